use std::io::Write;
use std::path::Path;

use clap::Parser;
use prm_cli::{exit_code, Cli, Commands, EXIT_FAILURE, EXIT_MISSING_MODEL};
use prm_core::ModelType;
use tempfile::tempdir;

const SEQ_LEN: usize = 3;

fn json_list<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(","))
}

/// Every fourth row has no relevant item.
fn write_dataset(path: &Path, rows: usize) {
    let mut file = std::fs::File::create(path).unwrap();
    for row in 0..rows {
        let target = row % SEQ_LEN;
        let iv = json_list((0..SEQ_LEN).map(|p| {
            let lead = if p == target { 1.0 } else { 0.0 };
            json_list(std::iter::once(lead).chain((1..7).map(|f| (f * p) as f32 / 10.0)))
        }));
        let pv = json_list((0..SEQ_LEN).map(|_| json_list([0.5f32; 12])));
        let icf = json_list((0..SEQ_LEN).map(|p| json_list((0..5).map(|f| p + f))));
        let labels = json_list((0..SEQ_LEN).map(|p| u8::from(row % 4 != 3 && p == target)));
        writeln!(file, "{}|[1,2,3]|{}|{}|{}|{}", row, icf, iv, pv, labels).unwrap();
    }
}

fn write_small_config(path: &Path) {
    std::fs::write(
        path,
        r#"{
  "data": {"batch_size": 4, "seq_len": 3},
  "model": {"d_model": 8, "d_inner_hid": 8, "n_head": 2, "d_k": 4, "d_v": 4, "n_layers": 1},
  "training": {"train_epochs": 2, "train_steps_per_epoch": 3, "validation_steps": 1, "warmup_steps": 10}
}"#,
    )
    .unwrap();
}

#[test]
fn parses_train_flags() {
    let cli = Cli::parse_from([
        "prm",
        "train",
        "--train-set",
        "train.txt",
        "--validation-set",
        "validation.txt",
        "--model-type",
        "2",
        "--d-feature",
        "24",
        "--lr-per-step",
        "300",
        "--early-stop-patience",
        "0",
    ]);
    let Commands::Train(cmd) = cli.command else {
        panic!("expected train");
    };
    assert_eq!(cmd.model.model_type, Some(ModelType::PersonalizedV2));
    assert_eq!(cmd.warmup_steps, Some(300));

    let config = cmd.config().unwrap();
    assert_eq!(config.model.d_feature, 24);
    assert_eq!(config.training.warmup_steps, 300);
    assert_eq!(config.training.early_stop_patience, Some(0));
    assert_eq!(config.data.seq_len, 30);
}

#[test]
fn no_early_stopping_clears_patience() {
    let cli = Cli::parse_from([
        "prm",
        "train",
        "--train-set",
        "a",
        "--validation-set",
        "b",
        "--no-early-stopping",
    ]);
    let Commands::Train(cmd) = cli.command else {
        panic!("expected train");
    };
    assert_eq!(cmd.config().unwrap().training.early_stop_patience, None);

    assert!(Cli::try_parse_from([
        "prm",
        "train",
        "--early-stop-patience",
        "3",
        "--no-early-stopping",
    ])
    .is_err());
}

#[test]
fn rejects_unknown_model_type() {
    assert!(Cli::try_parse_from(["prm", "predict", "--model-type", "3"]).is_err());
}

#[test]
fn train_requires_both_data_sets() {
    let cli = Cli::parse_from(["prm", "train", "--train-set", "train.txt"]);
    let err = cli.run().unwrap_err();
    assert_eq!(exit_code(&err), EXIT_FAILURE);
}

#[test]
fn width_mismatch_is_a_config_error() {
    let cli = Cli::parse_from([
        "prm",
        "predict",
        "--test-set",
        "test.txt",
        "--model-type",
        "2",
    ]);
    let Commands::Predict(cmd) = &cli.command else {
        panic!("expected predict");
    };
    assert!(cmd.config().is_err());
}

#[test]
fn predict_without_model_exits_with_missing_model_status() {
    let dir = tempdir().unwrap();
    let test = dir.path().join("test.txt");
    write_dataset(&test, 4);
    let model = dir.path().join("missing.json");

    let cli = Cli::parse_from([
        "prm",
        "predict",
        "--test-set",
        test.to_str().unwrap(),
        "--saved-model-name",
        model.to_str().unwrap(),
        "--seq-len",
        "3",
    ]);
    let err = cli.run().unwrap_err();
    assert_eq!(exit_code(&err), EXIT_MISSING_MODEL);
    assert!(!dir.path().join("test.txt.predict.out").exists());
}

#[test]
fn train_predict_evaluate() {
    let dir = tempdir().unwrap();
    let train = dir.path().join("train.txt");
    let validation = dir.path().join("validation.txt");
    let test = dir.path().join("test.txt");
    let config = dir.path().join("config.json");
    let model = dir.path().join("prm_model.json");
    let report = dir.path().join("metrics.json");
    write_dataset(&train, 12);
    write_dataset(&validation, 4);
    write_dataset(&test, 8);
    write_small_config(&config);

    let path = |p: &Path| p.to_str().unwrap().to_string();

    Cli::parse_from([
        "prm".to_string(),
        "train".to_string(),
        "--config".to_string(),
        path(&config),
        "--train-set".to_string(),
        path(&train),
        "--validation-set".to_string(),
        path(&validation),
        "--saved-model-name".to_string(),
        path(&model),
    ])
    .run()
    .unwrap();
    assert!(model.exists());

    Cli::parse_from([
        "prm".to_string(),
        "predict".to_string(),
        "--config".to_string(),
        path(&config),
        "--test-set".to_string(),
        path(&test),
        "--saved-model-name".to_string(),
        path(&model),
    ])
    .run()
    .unwrap();
    let predictions = dir.path().join("test.txt.predict.out");
    let content = std::fs::read_to_string(&predictions).unwrap();
    assert_eq!(content.lines().count(), 6);

    Cli::parse_from([
        "prm".to_string(),
        "evaluate".to_string(),
        "--predictions".to_string(),
        path(&predictions),
        "-k".to_string(),
        "1".to_string(),
        "--output".to_string(),
        path(&report),
    ])
    .run()
    .unwrap();
    let metrics: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(metrics["lists"], 6);
    assert!(metrics["reranked"]["ndcg"]["1"].is_number());
}
