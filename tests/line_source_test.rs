use kennel::line_source::{BufferedLog, LineSource, LiveLog};
use std::time::Duration;
use tokio::process::Command;

const POLL: Duration = Duration::from_millis(500);

async fn drain(source: &mut dyn LineSource) -> Vec<String> {
    let mut lines = Vec::new();
    while source.has_data(POLL).await {
        let line = source.read_line().await.unwrap();
        lines.push(String::from_utf8(line).unwrap());
    }
    lines
}

#[tokio::test]
async fn buffered_log_yields_lines_then_closes() {
    let mut log = BufferedLog::new(b"first\r\nsecond\nthird".to_vec());
    assert!(!log.is_closed());
    assert_eq!(drain(&mut log).await, vec!["first", "second", "third"]);
    assert!(log.is_closed());
    assert!(log.read_line().await.is_err());
}

#[tokio::test]
async fn empty_buffer_has_no_data() {
    let mut log = BufferedLog::new(Vec::new());
    assert!(!log.has_data(Duration::ZERO).await);
    assert!(log.is_closed());
}

#[tokio::test]
async fn live_log_streams_process_output() {
    let mut command = Command::new("sh");
    command.args(["-c", "printf 'one\\ntwo\\n'"]);
    let mut log = LiveLog::spawn(command).unwrap();

    assert_eq!(drain(&mut log).await, vec!["one", "two"]);

    // The process has exited; the stream ends.
    while !log.is_closed() {
        assert!(!log.has_data(POLL).await || log.read_line().await.is_ok());
    }
    log.close().await;
}

#[tokio::test]
async fn live_log_wait_is_bounded() {
    let mut command = Command::new("sh");
    command.args(["-c", "sleep 5; echo late"]);
    let mut log = LiveLog::spawn(command).unwrap();

    let started = std::time::Instant::now();
    assert!(!log.has_data(Duration::from_millis(50)).await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!log.is_closed());

    log.close().await;
    assert!(log.is_closed());
    assert!(!log.has_data(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn live_log_leaves_out_stderr() {
    let mut command = Command::new("sh");
    command.args(["-c", "echo 'Warning: Permanently added host' >&2; echo payload"]);
    let mut log = LiveLog::spawn(command).unwrap();

    assert_eq!(drain(&mut log).await, vec!["payload"]);
    log.close().await;
}
