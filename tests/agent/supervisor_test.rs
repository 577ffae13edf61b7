//! End-to-end supervisor tests against a scripted mock agent.
#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use claude_bridge::agent::{AgentStatus, PermissionDenial, ProcessSupervisor, SendRequest};
use claude_bridge::config::BridgeConfig;
use claude_bridge::dispatch::{NullObserver, SendObserver};
use claude_bridge::retry::{NegotiationState, RetryCoordinator};
use claude_bridge::session::PermissionDecision;

/// Write an executable shell script that plays the agent.
///
/// Every script consumes stdin first, the way the real agent waits for its
/// prompt before answering.
fn mock_agent(dir: &TempDir, body: &str) -> BridgeConfig {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("mock-agent.sh");
    let script = format!("#!/bin/sh\ncat > /dev/null\n{body}\n");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    BridgeConfig {
        agent_path: path.to_string_lossy().into_owned(),
        ..BridgeConfig::default()
    }
}

#[derive(Default, Clone)]
struct SharedRecorder {
    texts: Arc<Mutex<Vec<String>>>,
    tools: Arc<Mutex<Vec<(String, PermissionDecision)>>>,
    denials: Arc<Mutex<Vec<PermissionDenial>>>,
}

impl SendObserver for SharedRecorder {
    fn on_text(&mut self, chunk: &str) {
        self.texts.lock().unwrap().push(chunk.to_string());
    }
    fn on_tool_status(&mut self, tool_name: &str, decision: PermissionDecision) {
        self.tools.lock().unwrap().push((tool_name.to_string(), decision));
    }
    fn on_permission_denied(&mut self, denials: &[PermissionDenial]) {
        self.denials.lock().unwrap().extend_from_slice(denials);
    }
}

#[tokio::test]
async fn send_streams_events_and_latches_session() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"printf '{"type":"system","subtype":"init","session_id":"s1"}\n'
printf '{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"LS","input":{}}]}}\n'
printf '{"type":"result","is_error":false}\n'"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let mut observer = SharedRecorder::default();
    let outcome = supervisor
        .send(&SendRequest::new("list files"), &mut observer)
        .await;

    assert!(outcome.success, "outcome: {outcome:?}");
    assert_eq!(outcome.content, "");
    assert_eq!(supervisor.session_id(), Some("s1"));
    assert_eq!(
        *observer.tools.lock().unwrap(),
        vec![("LS".to_string(), PermissionDecision::Approved)]
    );
}

#[tokio::test]
async fn send_accumulates_text_across_turns() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"printf '{"type":"assistant","message":{"content":[{"type":"text","text":"one"}]}}\n'
printf '{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1"}]}}\n'
printf '{"type":"assistant","message":{"content":[{"type":"text","text":"two"}]}}\n'
printf '{"type":"result","is_error":false}\n'"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let mut observer = SharedRecorder::default();
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut observer)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.content, "one\n\ntwo");
}

#[tokio::test]
async fn exit_with_text_but_no_result_is_best_effort_success() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"printf '{"type":"assistant","message":{"content":[{"type":"text","text":"partial answer"}]}}\n'
exit 1"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.content, "partial answer");
}

#[tokio::test]
async fn nonzero_exit_without_output_is_failure_with_code() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(&dir, "exit 3");

    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("code 3"));
}

#[tokio::test]
async fn clean_exit_without_result_is_empty_success() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(&dir, "exit 0");

    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.content, "");
}

#[tokio::test]
async fn stderr_noise_does_not_affect_outcome() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"echo "warning: something" >&2
printf '{"type":"result","is_error":false}\n'"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;
    assert!(outcome.success);
}

#[tokio::test]
async fn error_result_carries_error_text() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"printf '{"type":"result","is_error":true,"error":"rate limited"}\n'"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("rate limited"));
}

#[tokio::test]
async fn missing_binary_is_distinct_failure() {
    let config = BridgeConfig {
        agent_path: "/nonexistent/claude".to_string(),
        ..BridgeConfig::default()
    };
    let mut supervisor = ProcessSupervisor::new(config);
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn deadline_kills_stalled_agent() {
    let dir = TempDir::new().unwrap();
    let mut config = mock_agent(&dir, "sleep 30");
    config.message_timeout_secs = 1;

    let mut supervisor = ProcessSupervisor::new(config);
    let started = Instant::now();
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut NullObserver)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn deadline_covers_prompt_delivery_to_non_reading_agent() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    // This script never reads stdin, so a prompt larger than the pipe
    // buffer leaves the writer blocked.
    let path = dir.path().join("mock-agent.sh");
    std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = BridgeConfig {
        agent_path: path.to_string_lossy().into_owned(),
        message_timeout_secs: 1,
        ..BridgeConfig::default()
    };

    let mut supervisor = ProcessSupervisor::new(config);
    let request = SendRequest::new("x".repeat(4 * 1024 * 1024));
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.send(&request, &mut NullObserver),
    )
    .await
    .expect("send must resolve within its configured deadline");

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn abort_mid_stream_resolves_with_cancellation() {
    let dir = TempDir::new().unwrap();
    let config = mock_agent(
        &dir,
        r#"printf '{"type":"assistant","message":{"content":[{"type":"text","text":"started"}]}}\n'
sleep 30"#,
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let handle = supervisor.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.abort();
    });

    let observer = SharedRecorder::default();
    let mut observer_handle = observer.clone();
    let started = Instant::now();
    let outcome = supervisor
        .send(&SendRequest::new("go"), &mut observer_handle)
        .await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("cancelled"));
    assert!(started.elapsed() < Duration::from_secs(10));

    // No further delivery once the send has resolved.
    let texts_at_resolution = observer.texts.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(observer.texts.lock().unwrap().len(), texts_at_resolution);
}

#[tokio::test]
async fn approve_all_and_retry_resends_identical_request_with_resume() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().to_string_lossy().into_owned();
    let config = mock_agent(
        &dir,
        &format!(
            r#"if [ ! -f "{state}/ran" ]; then
  touch "{state}/ran"
  printf '{{"type":"system","subtype":"init","session_id":"s1"}}\n'
  printf '{{"type":"result","is_error":false,"permission_denials":[{{"tool_name":"Bash","tool_use_id":"t9","tool_input":{{"command":"make"}}}}]}}\n'
else
  printf '%s\n' "$*" > "{state}/second_args"
  printf '{{"type":"result","is_error":false}}\n'
fi"#
        ),
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let mut coordinator = RetryCoordinator::new();
    let mut observer = SharedRecorder::default();

    let request = SendRequest::new("build the project");
    let outcome = coordinator
        .send(&mut supervisor, request, &mut observer)
        .await;

    assert!(outcome.success);
    assert_eq!(observer.denials.lock().unwrap().len(), 1);
    assert_eq!(coordinator.state(), NegotiationState::DenialsPending);

    let retried = coordinator
        .approve_all_and_retry(&mut supervisor, &mut observer)
        .await
        .expect("a prior request was recorded");

    assert!(retried.success);
    assert_eq!(coordinator.state(), NegotiationState::Done);
    assert!(supervisor.session().is_allowed("Bash"));

    let second_args = std::fs::read_to_string(dir.path().join("second_args")).unwrap();
    assert!(second_args.contains("--resume s1"), "args: {second_args}");
    assert!(second_args.contains("Bash"), "args: {second_args}");
}

#[tokio::test]
async fn retry_without_prior_request_is_rejected() {
    let mut supervisor = ProcessSupervisor::new(BridgeConfig::default());
    let mut coordinator = RetryCoordinator::new();
    let result = coordinator
        .approve_all_and_retry(&mut supervisor, &mut NullObserver)
        .await;
    assert!(result.is_none());
}

#[tokio::test]
async fn check_availability_reports_version() {
    let dir = TempDir::new().unwrap();
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join("mock-agent.sh");
    std::fs::write(&path, "#!/bin/sh\necho '1.2.3 (Claude Code)'\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = BridgeConfig {
        agent_path: path.to_string_lossy().into_owned(),
        ..BridgeConfig::default()
    };
    let supervisor = ProcessSupervisor::new(config);

    assert_eq!(
        supervisor.check_availability().await,
        AgentStatus::Ready {
            version: Some("1.2.3".to_string())
        }
    );
}

#[tokio::test]
async fn check_availability_surfaces_probe_failure() {
    let dir = TempDir::new().unwrap();
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join("mock-agent.sh");
    std::fs::write(&path, "#!/bin/sh\necho 'not logged in' >&2\nexit 1\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = BridgeConfig {
        agent_path: path.to_string_lossy().into_owned(),
        ..BridgeConfig::default()
    };
    let supervisor = ProcessSupervisor::new(config);

    let status = supervisor.check_availability().await;
    let AgentStatus::Error { message } = status else {
        panic!("expected error status, got {status:?}");
    };
    assert!(message.contains("not logged in"));
}

#[tokio::test]
async fn session_resumes_on_second_send() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().to_string_lossy().into_owned();
    let config = mock_agent(
        &dir,
        &format!(
            r#"printf '%s\n' "$*" >> "{state}/all_args"
printf '{{"type":"system","subtype":"init","session_id":"s7"}}\n'
printf '{{"type":"result","is_error":false}}\n'"#
        ),
    );

    let mut supervisor = ProcessSupervisor::new(config);
    let first = supervisor
        .send(&SendRequest::new("first"), &mut NullObserver)
        .await;
    assert!(first.success);

    let second = supervisor
        .send(&SendRequest::new("second"), &mut NullObserver)
        .await;
    assert!(second.success);

    let args = std::fs::read_to_string(dir.path().join("all_args")).unwrap();
    let lines: Vec<&str> = args.lines().collect();
    assert!(!lines[0].contains("--resume"));
    assert!(lines[1].contains("--resume s7"));
}
