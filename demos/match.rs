use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use bovw::*;

fn main() -> BowResult<()> {
    // Load the vocabulary written by the create-voc demo
    let voc = Vocabulary::load("vocabs/test.voc")?;
    println!("Vocabulary: {:#?}", voc);
    let extractor = ExtractorMethod::Orb.build(&DetectorParams::default())?;

    // Create BoW vectors from the test data. Save file name for demonstration.
    let mut bows: Vec<(PathBuf, BoW)> = Vec::new();
    for img in Dataset::from_dir("data/test")?.images().iter().take(6) {
        let gray = dataset::load_gray(&img.path, (200, 200))?;
        let features = extractor.extract(&gray)?;
        if let Some(bow) = voc.transform(&features.descriptors)? {
            bows.push((img.path.clone(), bow));
        }
    }

    // Match every image to every other image
    for (f1, bow1) in bows.iter() {
        let mut scores: Vec<(f32, &OsStr)> = Vec::new();
        for (f2, bow2) in bows.iter() {
            scores.push((bow1.l1(bow2), file_name(f2)));
        }

        // Print out the top 5 matches for each image
        println!("\nTop 5 Matches for {:#?}:", file_name(f1));
        println!("Match      |      Score");
        scores.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        for m in scores.iter().take(5) {
            println!("{:#?} | {:#?}", m.1, m.0);
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> &OsStr {
    path.file_name().unwrap_or_else(|| path.as_os_str())
}
