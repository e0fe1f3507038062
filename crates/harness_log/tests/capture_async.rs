//! Runs with `cargo test -p harness_log --features tokio`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use harness_log::priority::{STDERR, STDOUT};
use harness_log::{
    capture_stream, LogConfig, LoggerRegistry, MemorySink, PriorityLineBuffer, UnitHandle,
    UnitKind,
};

fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[tokio::test]
async fn capture_stream_splits_lines_and_flushes_tail() {
    let buffer = PriorityLineBuffer::new();
    let data: &[u8] = b"one\r\ntwo\nthree";
    let total = capture_stream(data, &buffer, STDOUT, None).await.unwrap();
    assert_eq!(total, 14);
    assert_eq!(
        buffer.to_string_array(STDOUT, STDOUT),
        vec!["one", "two", "three"]
    );
}

#[tokio::test]
async fn captured_process_output_lands_in_its_logger() {
    let _guard = serial();
    let sink = Arc::new(MemorySink::new());
    let root = UnitHandle::new(0, UnitKind::Suite, "run");
    let registry = LoggerRegistry::init_with_sink(root.clone(), LogConfig::default(), sink.clone());
    let process = UnitHandle::new(1, UnitKind::Process { background: false }, "build");
    let logger = registry.unit_started(&process).unwrap().unwrap();

    let stderr: &[u8] = b"warning: unused\n\nerror: failed\n";
    capture_stream(stderr, Arc::clone(&logger), STDERR, None)
        .await
        .unwrap();
    registry.unit_finished(&process, None).unwrap();
    registry.unit_finished(&root, None).unwrap();

    let record = sink.find("run/build").unwrap();
    let lines: Vec<&str> = record.output.iter().map(|run| run.text.as_str()).collect();
    assert_eq!(lines, vec!["warning: unused\nerror: failed"]);
}
