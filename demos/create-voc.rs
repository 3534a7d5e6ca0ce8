use bovw::*;

fn main() -> BowResult<()> {
    tracing_subscriber::fmt::init();

    // Extract ORB descriptors from every training image
    let train = Dataset::from_dir("data/train")?;
    let extractor = ExtractorMethod::Orb.build(&DetectorParams::default())?;
    let mut features: Vec<Desc> = Vec::new();
    for img in train.images() {
        let gray = dataset::load_gray(&img.path, (200, 200))?;
        features.extend(extractor.extract(&gray)?.descriptors);
    }
    println!("Detected {} ORB features.", features.len());

    // Create vocabulary from features
    let strategy = ClusterStrategy::MiniBatchKMeans(MiniBatchParams::new(100).with_seed(0));
    let voc = Vocabulary::create_with_strategy(&features, &strategy)?;
    println!("\nVocabulary = {:#?}", voc);

    // Save vocab and load it again just for fun
    std::fs::create_dir_all("vocabs")?;
    voc.save("vocabs/test.voc")?;
    let loaded_voc = Vocabulary::load("vocabs/test.voc")?;

    // Make sure save & load worked
    assert_eq!(voc, loaded_voc);
    Ok(())
}
