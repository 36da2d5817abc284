use std::io::Write;
use std::path::{Path, PathBuf};

use prm_core::{ModelType, RerankConfig};
use prm_data::{BatchStream, StreamMode, Tensorizer};
use prm_training::{
    evaluate_predictions, load_model, RankedOutputRecord, RankingEvaluator, SequenceModel, Trainer,
    TrainingError,
};
use tempfile::tempdir;

const SEQ_LEN: usize = 4;

fn json_list<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    let items: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
    format!("[{}]", items.join(","))
}

/// The relevant item is the one with the largest first `iv` feature, so the
/// data is learnable. Every fifth row has no relevant item.
fn write_dataset(path: &Path, rows: usize) {
    let mut file = std::fs::File::create(path).unwrap();
    for row in 0..rows {
        let target = (row * 3 + 1) % SEQ_LEN;
        let iv = json_list((0..SEQ_LEN).map(|p| {
            let lead = if p == target { 0.9 } else { 0.1 * p as f32 };
            json_list(std::iter::once(lead).chain((1..7).map(|f| (f + row % 3) as f32 / 10.0)))
        }));
        let pv = json_list((0..SEQ_LEN).map(|p| json_list((0..12).map(|f| ((p + f) % 2) as f32))));
        let icf = json_list((0..SEQ_LEN).map(|p| json_list((0..5).map(|f| p * 10 + f))));
        let labels = json_list((0..SEQ_LEN).map(|p| u8::from(row % 5 != 4 && p == target)));
        writeln!(
            file,
            "{}|{}|{}|{}|{}|{}",
            row % 7,
            json_list([row % 3, 1, 2]),
            icf,
            iv,
            pv,
            labels
        )
        .unwrap();
    }
}

fn config(dir: &Path, model_type: ModelType) -> (RerankConfig, PathBuf) {
    let train = dir.join("train.txt");
    let validation = dir.join("validation.txt");
    let test = dir.join("test.txt");
    write_dataset(&train, 24);
    write_dataset(&validation, 8);
    write_dataset(&test, 10);

    let d_feature = if model_type == ModelType::PersonalizedV2 { 24 } else { 7 };
    let mut config = RerankConfig::default()
        .with_model_type(model_type)
        .with_d_feature(d_feature)
        .with_batch_size(4)
        .with_seq_len(SEQ_LEN);
    config.model.d_model = 8;
    config.model.d_inner_hid = 16;
    config.model.n_head = 2;
    config.model.d_k = 4;
    config.model.d_v = 4;
    config.model.n_layers = 1;
    config.model.embedding_dim = 2;
    config.model.embedding_buckets = 32;
    config.training.train_epochs = 3;
    config.training.train_steps_per_epoch = 6;
    config.training.validation_steps = 2;
    config.training.warmup_steps = 20;
    config.training.early_stop_patience = Some(2);
    config.paths.train_set = Some(train);
    config.paths.validation_set = Some(validation);
    config.paths.test_set = Some(test.clone());
    config.paths.saved_model_name = dir.join("model").join("prm_model.json");
    config.validate().unwrap();
    (config, test)
}

fn open(config: &RerankConfig, path: &Path, mode: StreamMode) -> BatchStream {
    BatchStream::open(path, config.delimiter_byte(), mode, config.data.batch_size).unwrap()
}

fn train_then_predict(model_type: ModelType) {
    let dir = tempdir().unwrap();
    let (config, test) = config(dir.path(), model_type);
    let (train_path, validation_path) = config.training_paths().unwrap();

    let mut trainer = Trainer::from_config(&config).unwrap();
    let report = trainer
        .fit(
            &mut open(&config, train_path, StreamMode::Forever),
            &mut open(&config, validation_path, StreamMode::Forever),
        )
        .unwrap();
    assert!(!report.history.is_empty());
    assert!(report.history[0].checkpoint_saved);
    assert!(report.history.iter().all(|s| s.val_loss.map_or(false, f64::is_finite)));
    assert!(config.paths.saved_model_name.exists());

    let model = load_model(&config).unwrap();
    assert_eq!(model.model_type(), model_type);

    let tensorizer = Tensorizer::from_config(&config).unwrap();
    let evaluator = RankingEvaluator::new(&model, tensorizer).unwrap();
    let mut stream = open(&config, &test, StreamMode::Once);
    let (output, eval) = evaluator.run_for_test_set(&mut stream, &test).unwrap();

    assert_eq!(output, dir.path().join("test.txt.predict.out"));
    assert_eq!(eval.rows_seen, 10);
    assert_eq!(eval.rows_skipped, 2);
    assert_eq!(eval.rows_written, 8);

    let content = std::fs::read_to_string(&output).unwrap();
    for (i, line) in content.lines().enumerate() {
        let record = RankedOutputRecord::parse(line, i + 1).unwrap();
        let mut sorted_original = record.original.clone();
        let mut sorted_reranked = record.reranked.clone();
        sorted_original.sort_by(f32::total_cmp);
        sorted_reranked.sort_by(f32::total_cmp);
        assert_eq!(sorted_original, sorted_reranked);
    }

    let metrics = evaluate_predictions(&output, &[1, 4]).unwrap();
    assert_eq!(metrics.lists, 8);
    assert!(metrics.reranked.map > 0.0 && metrics.reranked.map <= 1.0);
}

#[test]
fn context_only_train_then_predict() {
    train_then_predict(ModelType::ContextOnly);
}

#[test]
fn personalized_v1_train_then_predict() {
    train_then_predict(ModelType::PersonalizedV1);
}

#[test]
fn personalized_v2_train_then_predict() {
    train_then_predict(ModelType::PersonalizedV2);
}

#[test]
fn load_model_without_checkpoint() {
    let dir = tempdir().unwrap();
    let (config, _) = config(dir.path(), ModelType::ContextOnly);
    match load_model(&config) {
        Err(err) => assert!(err.is_missing_checkpoint(), "{}", err),
        Ok(_) => panic!("expected a missing checkpoint"),
    }
}

#[test]
fn checkpoint_from_other_mode_is_rejected() {
    let dir = tempdir().unwrap();
    let (mut config, _) = config(dir.path(), ModelType::ContextOnly);
    config.training.train_epochs = 1;
    let (train_path, validation_path) = config.training_paths().unwrap();

    let mut trainer = Trainer::from_config(&config).unwrap();
    trainer
        .fit(
            &mut open(&config, train_path, StreamMode::Forever),
            &mut open(&config, validation_path, StreamMode::Forever),
        )
        .unwrap();

    let other = config
        .clone()
        .with_model_type(ModelType::PersonalizedV2)
        .with_d_feature(24);
    assert!(matches!(load_model(&other), Err(TrainingError::Checkpoint(_))));
}

#[test]
fn empty_training_file_is_fatal() {
    let dir = tempdir().unwrap();
    let (config, _) = config(dir.path(), ModelType::ContextOnly);
    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, "").unwrap();
    let validation = config.paths.validation_set.clone().unwrap();

    let mut trainer = Trainer::from_config(&config).unwrap();
    let result = trainer.fit(
        &mut open(&config, &empty, StreamMode::Forever),
        &mut open(&config, &validation, StreamMode::Forever),
    );
    assert!(matches!(result, Err(TrainingError::Data(_))));
}
