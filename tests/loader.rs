#[path = "../src/datasets/fixtures.rs"]
mod fixtures;

use fixtures::RandomDataset;
use ndarray::Axis;
use pbdl::{datasets::*, Config};

fn offline(dir: &std::path::Path) -> Config {
    let path = dir.join("config.json");
    let json = serde_json::json!({
        "local_datasets_dir": dir,
        "global_dataset_dir": dir.join("global"),
        "offline": true,
    });
    std::fs::write(&path, json.to_string()).unwrap();
    Config::from_file(path).unwrap()
}

#[test]
fn test_split_train_and_test_loaders() {
    let dir = tempfile::tempdir().unwrap();
    RandomDataset {
        sims: 5,
        ..Default::default()
    }
    .write(dir.path().join("random.hdf5"))
    .unwrap();
    let config = offline(dir.path());
    assert_eq!(datasets(&config), vec!["random"]);

    let ids: Vec<usize> = (0..5).collect();
    let split = SimSplit::new(&ids, 0.6, 0.2, Some(0)).unwrap();

    let open = |split_sims: &[usize]| {
        Dataloader::open_with_config(
            "random",
            DatasetOptions {
                time_steps: Some(5),
                normalize_data: Some(NormStrategy::MeanStd),
                normalize_const: Some(NormStrategy::Std),
                sel_sims: Some(split_sims.to_vec()),
                disable_progress: true,
                ..Default::default()
            },
            LoaderOptions {
                batch_size: 4,
                shuffle: true,
                seed: Some(5),
                ..Default::default()
            },
            &config,
        )
        .unwrap()
    };

    let mut train = open(split.sims(DatasetSplit::Train).unwrap());
    let mut test = open(split.sims(DatasetSplit::Test).unwrap());

    // 15 samples per simulation
    assert_eq!(train.dataset().len(), 3 * 15);
    assert_eq!(train.len(), 12);
    assert_eq!(test.dataset().len(), 15);
    assert_eq!(test.len(), 4);

    for batch in &mut train {
        let batch = batch.unwrap();
        let b = batch.input.len_of(Axis(0));
        assert_eq!(&batch.input.shape()[1..], &[5, 8, 6]);
        assert_eq!(batch.target.shape(), &[b, 4, 8, 6]);
        assert_eq!(batch.constants_raw.shape(), &[b, 1]);
    }
    assert_eq!(test.iter().filter(|b| b.is_ok()).count(), 4);
}

#[test]
fn test_normalization_is_reversible() {
    let dir = tempfile::tempdir().unwrap();
    RandomDataset::default()
        .write(dir.path().join("random.hdf5"))
        .unwrap();
    let config = offline(dir.path());

    // statistics are written on first open, before any read-only handle exists
    let norm = Dataset::open_with_config(
        "random",
        DatasetOptions {
            normalize_data: Some(NormStrategy::MinMax { min: 0.0, max: 1.0 }),
            disable_progress: true,
            ..Default::default()
        },
        &config,
    )
    .unwrap();
    let raw = Dataset::open_with_config("random", DatasetOptions::default(), &config).unwrap();

    let expected = raw.get(7).unwrap();
    let mut sample = norm.get(7).unwrap();
    assert!(sample.input.iter().all(|&v| (-1e-5..=1.0 + 1e-5).contains(&v)));

    norm.norm_data()
        .unwrap()
        .normalize_rev(&mut sample.input, Axis(0))
        .unwrap();
    for (a, b) in sample.input.iter().zip(expected.input.iter()) {
        assert!((a - b).abs() < 1e-4);
    }
}

#[test]
fn test_unknown_dataset_lists_available() {
    let dir = tempfile::tempdir().unwrap();
    RandomDataset::default()
        .write(dir.path().join("random.hdf5"))
        .unwrap();
    let config = offline(dir.path());

    match Dataset::open_with_config("nonexistent", DatasetOptions::default(), &config) {
        Err(Error::NotFound { name, available }) => {
            assert_eq!(name, "nonexistent");
            assert_eq!(available, "random");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}
