use bovw::*;
use image::{GrayImage, Luma};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

const SIZE: u32 = 160;

/// Rectangles of random size and brightness scattered over a dark background.
fn scene(seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(SIZE, SIZE, Luma([25u8]));
    for _ in 0..25 {
        let (w, h) = (rng.gen_range(8..24), rng.gen_range(8..24));
        let (x0, y0) = (rng.gen_range(0..SIZE - w), rng.gen_range(0..SIZE - h));
        let v = Luma([rng.gen_range(120u8..=250)]);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, v);
            }
        }
    }
    img
}

/// Write `root/<class>/img_<i>.png` for every class. `flat` images have no keypoints.
fn write_tree(root: &Path, classes: &[&str], per_class: u64, flat: &[&str]) {
    for (c, class) in classes.iter().enumerate() {
        let dir = root.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let img = if flat.contains(class) {
                GrayImage::from_pixel(SIZE, SIZE, Luma([128u8]))
            } else {
                scene(1000 * c as u64 + i + 1)
            };
            img.save(dir.join(format!("img_{}.png", i))).unwrap();
        }
    }
}

fn config(root: &Path, k: Option<usize>) -> PipelineConfig {
    PipelineConfig {
        train_dir: Some(root.join("train")),
        test_dir: Some(root.join("test")),
        clustering: ClusterStrategy::MiniBatchKMeans(MiniBatchParams {
            k,
            ..Default::default()
        }),
        image_size: [SIZE, SIZE],
        seed: 42,
        ..Default::default()
    }
}

fn run(config: &PipelineConfig) -> BowResult<PipelineOutput> {
    let (train, test) = config.load_datasets()?;
    Pipeline::new(config)?.run(&train, &test)
}

#[test]
fn three_classes_two_images_each() {
    let dir = tempfile::tempdir().unwrap();
    let classes = ["Amur Leopard", "Chimpanzee", "Orangutan"];
    write_tree(&dir.path().join("train"), &classes, 2, &[]);
    write_tree(&dir.path().join("test"), &classes, 1, &[]);

    let out = run(&config(dir.path(), Some(30))).unwrap();
    let k = out.vocabulary.len();
    assert!(k > 0 && k <= 30);
    assert_eq!(out.vocabulary.dim(), 32);
    assert_eq!(out.labels.classes(), &["Amur Leopard", "Chimpanzee", "Orangutan"]);

    assert_eq!(out.train.matrix.shape(), &[6, k]);
    assert_eq!(out.train.labels, vec![0, 0, 1, 1, 2, 2]);
    assert_eq!(out.test.matrix.shape(), &[3, k]);
    assert_eq!(out.test.labels, vec![0, 1, 2]);

    for row in out.train.matrix.rows().into_iter().chain(out.test.matrix.rows()) {
        assert!(row.iter().all(|v| v.is_finite() && *v >= 0.));
        assert!((row.sum() - 1.).abs() < 1e-4);
    }
}

#[test]
fn ten_words_per_class_when_k_is_unset() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 2, &[]);
    write_tree(&dir.path().join("test"), &["a"], 1, &[]);

    let out = run(&config(dir.path(), None)).unwrap();
    assert_eq!(out.vocabulary.len(), 20);
    assert_eq!(out.test.num_words(), 20);
}

#[test]
fn same_seed_same_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 2, &[]);
    write_tree(&dir.path().join("test"), &["b"], 1, &[]);

    let cfg = config(dir.path(), Some(12));
    let first = run(&cfg).unwrap();
    let second = run(&cfg).unwrap();
    assert_eq!(first.vocabulary, second.vocabulary);
    assert_eq!(first.train, second.train);
    assert_eq!(first.test, second.test);
}

#[test]
fn more_requested_words_never_shrinks_the_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 2, &[]);
    write_tree(&dir.path().join("test"), &["a"], 1, &[]);

    let mut last = 0;
    for &k in [4, 8, 16].iter() {
        let realized = run(&config(dir.path(), Some(k))).unwrap().vocabulary.len();
        assert!(realized >= last);
        last = realized;
    }
}

#[test]
fn mean_shift_vocabulary_size_is_data_driven() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 1, &[]);
    write_tree(&dir.path().join("test"), &["a"], 1, &[]);

    let cfg = PipelineConfig {
        clustering: ClusterStrategy::MeanShift(MeanShiftParams {
            bandwidth: 900.,
            bin_seeding: true,
            ..Default::default()
        }),
        ..config(dir.path(), None)
    };
    let out = run(&cfg).unwrap();
    assert!(!out.vocabulary.is_empty());
    assert_eq!(out.train.num_words(), out.vocabulary.len());
    assert_eq!(out.vocabulary.words().len(), out.vocabulary.len());
}

#[test]
fn no_keypoints_anywhere_is_an_empty_pool() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 2, &["a", "b"]);
    write_tree(&dir.path().join("test"), &["a"], 1, &[]);

    assert!(matches!(
        run(&config(dir.path(), Some(5))),
        Err(BowErr::EmptyDescriptorPool)
    ));
}

#[test]
fn featureless_test_image_follows_policy() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 2, &[]);
    write_tree(&dir.path().join("test"), &["a", "b"], 1, &["b"]);

    let mut cfg = config(dir.path(), Some(8));
    assert!(matches!(run(&cfg), Err(BowErr::NoFeaturesDetected(_))));

    cfg.empty_image_policy = EmptyImagePolicy::Skip;
    let out = run(&cfg).unwrap();
    assert_eq!(out.test.labels, vec![0]);

    cfg.empty_image_policy = EmptyImagePolicy::ZeroFill;
    let out = run(&cfg).unwrap();
    assert_eq!(out.test.labels, vec![0, 1]);
    assert_eq!(out.test.zero_rows, vec![1]);
    assert!(out.test.histogram(1).iter().all(|&v| v == 0.));
}

#[test]
fn unseen_test_class_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("train"), &["a", "b"], 1, &[]);
    write_tree(&dir.path().join("test"), &["c"], 1, &[]);

    match run(&config(dir.path(), Some(4))) {
        Err(BowErr::UnknownLabel(class)) => assert_eq!(class, "c"),
        other => panic!("unexpected {:?}", other.map(|o| o.vocabulary)),
    }
}

#[test]
fn split_from_one_tree() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(&dir.path().join("all"), &["a", "b"], 5, &[]);

    let cfg = PipelineConfig {
        data_dir: Some(dir.path().join("all")),
        train_ratio: 0.6,
        train_dir: None,
        test_dir: None,
        ..config(dir.path(), Some(10))
    };
    let out = run(&cfg).unwrap();
    assert_eq!(out.train.len(), 6);
    assert_eq!(out.test.len(), 4);
}

#[test]
fn unavailable_extractor_fails_before_reading_images() {
    if cfg!(feature = "opencv") {
        return;
    }
    let cfg = PipelineConfig {
        extractor: ExtractorMethod::Sift,
        train_dir: Some("does/not/exist".into()),
        test_dir: Some("does/not/exist".into()),
        ..Default::default()
    };
    assert!(matches!(
        Pipeline::new(&cfg),
        Err(BowErr::ExtractorUnavailable(ExtractorMethod::Sift))
    ));
}
