//! Replay a JSON-lines capture through the built-in linear model

use flowclass_core::{
    ClassifierConfig, JsonLinesSink, LinearModel, LinearModelFile, Pipeline, ReplaySource, FEATURE_COUNT,
};
use std::io::Write;
use std::sync::Arc;

/// Class 1 ("File Transfer") wins for busy flows, class 0 ("Chat") otherwise
fn model_file() -> LinearModelFile {
    let mut weights = vec![vec![0.0; FEATURE_COUNT]; 4];
    weights[1][4] = 1.0;
    LinearModelFile {
        weights,
        bias: vec![2.0, 0.0, -5.0, -5.0],
    }
}

fn write_capture() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // A busy conversation seen in both directions, plus a quiet flow
    for i in 0..40 {
        let ts = i as f64 * 0.05;
        let (src, dst, sp, dp) = if i % 2 == 0 {
            ("10.0.0.5", "10.0.0.9", 40000, 443)
        } else {
            ("10.0.0.9", "10.0.0.5", 443, 40000)
        };
        writeln!(
            file,
            r#"{{"src":"{src}","dst":"{dst}","src_port":{sp},"dst_port":{dp},"protocol":6,"ts":{ts},"size":1400}}"#
        )
        .unwrap();
    }
    writeln!(file, r#"{{"src":"10.0.0.7","dst":"10.0.0.8","src_port":5060,"dst_port":5060,"protocol":17,"ts":0.1,"size":80}}"#).unwrap();
    writeln!(file, r#"{{"src":"10.0.0.7","dst":"10.0.0.8","src_port":5060,"dst_port":5060,"protocol":17,"ts":1.9,"size":80}}"#).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_replay_classifies_and_flushes_last_window() {
    let capture = write_capture();
    let model = LinearModel::from_file_repr(model_file()).unwrap();
    let config = ClassifierConfig {
        window_secs: 1.0,
        ..Default::default()
    };
    let mut source = ReplaySource::open(capture.path(), config.bidirectional).await.unwrap();

    let sink = Arc::new(JsonLinesSink::new(Vec::new()));
    let outcome = Pipeline::new(config, Arc::new(model))
        .unwrap()
        .with_sink(sink.clone())
        .run(&mut source)
        .await
        .unwrap();

    assert_eq!(outcome.stats.packets, 42);
    assert_eq!(outcome.stats.windows, 2);

    let report = outcome.last_report.unwrap();
    assert_eq!(report.flows.len(), 2);
    let busy = report.flows.iter().find(|f| f.flow.protocol == 6).unwrap();
    assert_eq!(busy.class_label, "File Transfer");
    assert_eq!(busy.observations, 2);
    let quiet = report.flows.iter().find(|f| f.flow.protocol == 17).unwrap();
    assert_eq!(quiet.class_label, "Chat");

    let sink = Arc::try_unwrap(sink).ok().unwrap();
    let out = String::from_utf8(sink.into_inner()).unwrap();
    assert_eq!(out.lines().count(), 2);
}

#[tokio::test]
async fn test_unidirectional_replay_splits_conversation() {
    let capture = write_capture();
    let model = LinearModel::from_file_repr(model_file()).unwrap();
    let config = ClassifierConfig {
        window_secs: 10.0,
        bidirectional: false,
        ..Default::default()
    };
    let mut source = ReplaySource::open(capture.path(), config.bidirectional).await.unwrap();

    let outcome = Pipeline::new(config, Arc::new(model)).unwrap().run(&mut source).await.unwrap();

    assert_eq!(outcome.stats.windows, 1);
    assert_eq!(outcome.tracker.len(), 3);
}

#[tokio::test]
async fn test_malformed_line_aborts_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"src":"10.0.0.1","dst":"10.0.0.2","src_port":1,"dst_port":2,"ts":0.0,"size":10}}"#).unwrap();
    writeln!(file, "not json").unwrap();
    file.flush().unwrap();

    let model = LinearModel::from_file_repr(model_file()).unwrap();
    let mut source = ReplaySource::open(file.path(), true).await.unwrap();
    let result = Pipeline::new(ClassifierConfig::default(), Arc::new(model))
        .unwrap()
        .run(&mut source)
        .await;

    assert!(matches!(result, Err(flowclass_core::FlowError::Parse(_))));
}
