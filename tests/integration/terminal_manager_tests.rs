//! Terminal manager integration tests

use crate::common::setup_test_logging;
use crucible_terminal::protocol::{ClientFrame, ServerFrame};
use crucible_terminal::{Attachment, SessionOptions, TerminalConfig, TerminalManager};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manager() -> Arc<TerminalManager> {
    Arc::new(TerminalManager::new(TerminalConfig {
        default_shell: Some("sh".to_string()),
        ..Default::default()
    }))
}

async fn collect_until(attachment: &mut Attachment, needle: &[u8], timeout: Duration) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    let mut collected = attachment.history.clone();
    while Instant::now() < deadline {
        if collected.windows(needle.len()).any(|w| w == needle) {
            break;
        }
        match tokio::time::timeout(Duration::from_millis(200), attachment.recv()).await {
            Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(_) => continue,
        }
    }
    collected
}

#[tokio::test]
async fn every_subscriber_sees_the_same_output() {
    setup_test_logging();
    let manager = manager();
    let session = manager.create_session(SessionOptions::default()).unwrap();

    let mut first = manager.attach(session.id).unwrap();
    let mut second = manager.attach(session.id).unwrap();
    assert_eq!(manager.snapshot(session.id).unwrap().subscribers, 2);

    manager
        .write_input(session.id, b"echo fan-out-check\n")
        .unwrap();

    for attachment in [&mut first, &mut second] {
        let output = collect_until(attachment, b"fan-out-check", Duration::from_secs(5)).await;
        assert!(
            String::from_utf8_lossy(&output).contains("fan-out-check"),
            "subscriber missed output"
        );
    }
    manager.shutdown();
}

#[tokio::test]
async fn late_joiner_replays_history() {
    setup_test_logging();
    let manager = manager();
    let session = manager.create_session(SessionOptions::default()).unwrap();

    let mut early = manager.attach(session.id).unwrap();
    manager
        .write_input(session.id, b"echo before-the-join\n")
        .unwrap();
    let seen = collect_until(&mut early, b"before-the-join", Duration::from_secs(5)).await;
    assert!(String::from_utf8_lossy(&seen).contains("before-the-join"));

    // a subscriber attaching now gets the scrollback without re-running
    // anything
    let late = manager.attach(session.id).unwrap();
    assert!(
        String::from_utf8_lossy(&late.history).contains("before-the-join"),
        "history replay missing"
    );
    manager.shutdown();
}

#[tokio::test]
async fn frames_translate_pty_traffic() {
    setup_test_logging();
    let manager = manager();
    let session = manager.create_session(SessionOptions::default()).unwrap();
    let mut attachment = manager.attach(session.id).unwrap();

    // what a websocket handler would do with an input frame
    let frame: ClientFrame =
        serde_json::from_str(r#"{"type":"input","data":"echo framed\n"}"#).unwrap();
    match frame {
        ClientFrame::Input { data } => {
            manager.write_input(session.id, data.as_bytes()).unwrap()
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let output = collect_until(&mut attachment, b"framed", Duration::from_secs(5)).await;
    let server_frame = ServerFrame::output(&output);
    let encoded = serde_json::to_string(&server_frame).unwrap();
    assert!(encoded.starts_with(r#"{"type":"output""#));
    assert!(encoded.contains("framed"));

    // resize frames carry dimensions straight through
    let frame: ClientFrame =
        serde_json::from_str(r#"{"type":"resize","rows":50,"cols":160}"#).unwrap();
    if let ClientFrame::Resize { rows, cols } = frame {
        manager.resize(session.id, rows, cols).unwrap();
    }
    assert_eq!(manager.snapshot(session.id).unwrap().cols, 160);
    manager.shutdown();
}

#[tokio::test]
async fn shutdown_closes_all_sessions() {
    setup_test_logging();
    let manager = manager();
    for _ in 0..3 {
        manager.create_session(SessionOptions::default()).unwrap();
    }
    assert_eq!(manager.session_count(), 3);
    manager.shutdown();
    assert_eq!(manager.session_count(), 0);
    assert!(manager.list_sessions().is_empty());
}
