//
// kernel_state_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! Tests for the kernel status state machine and its event stream.

use async_channel::Receiver;
use elbridge::error::ElError;
use elbridge::execution_tracker::ExecutionMode;
use elbridge::jupyter_messages::ExecutionState;
use elbridge::kernel_state::KernelState;
use elshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use elshared::kernel_message::{KernelMessage, KernelStatus, StatusUpdate};
use elshared::session_event::SessionEvent;
use serde_json::json;

fn state() -> KernelState {
    KernelState::new(String::from("test-session"))
}

fn next_status(events: &Receiver<SessionEvent>) -> StatusUpdate {
    match events.try_recv().expect("Expected a session event") {
        SessionEvent::Kernel(KernelMessage::Status(update)) => update,
        other => panic!("Expected a status event, got {:?}", other),
    }
}

fn request(msg_id: &str) -> JupyterMessage {
    JupyterMessage {
        header: JupyterMessageHeader {
            msg_id: msg_id.to_string(),
            msg_type: String::from("execute_request"),
        },
        parent_header: None,
        channel: JupyterChannel::Shell,
        content: json!({ "code": "1 + 1" }),
        metadata: json!({}),
        buffers: vec![],
    }
}

#[test]
fn test_initial_state() {
    let state = state();
    assert_eq!(state.status, KernelStatus::Uninitialized);
    assert!(state.process_id.is_none());
    assert!(state.kernel_info.is_none());
    assert!(state.idle_since.is_none());
    assert!(state.busy_since.is_none());
    assert!(state.executions.is_empty());
}

#[test]
fn test_status_changes_publish_events_in_order() {
    let mut state = state();
    let events = state.subscribe();

    state.set_status(KernelStatus::Starting, Some(String::from("start requested")));
    state.set_status(KernelStatus::Ready, Some(String::from("kernel info received")));

    let update = next_status(&events);
    assert_eq!(update.status, KernelStatus::Starting);
    assert_eq!(update.reason.as_deref(), Some("start requested"));

    let update = next_status(&events);
    assert_eq!(update.status, KernelStatus::Ready);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_same_status_not_republished() {
    let mut state = state();
    let events = state.subscribe();

    state.set_status(KernelStatus::Starting, Some(String::from("start requested")));
    state.set_status(KernelStatus::Starting, Some(String::from("again")));

    next_status(&events);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_exited_is_terminal() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Exited, None);

    let events = state.subscribe();
    state.set_status(KernelStatus::Idle, Some(String::from("resurrection attempt")));

    assert_eq!(state.status, KernelStatus::Exited);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_running_kernel_passes_through_exiting() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);
    state.set_status(KernelStatus::Idle, None);

    let events = state.subscribe();
    state.set_status(KernelStatus::Exited, Some(String::from("child process exited")));

    // Subscribers always observe the teardown before the terminal state
    let update = next_status(&events);
    assert_eq!(update.status, KernelStatus::Exiting);
    let update = next_status(&events);
    assert_eq!(update.status, KernelStatus::Exited);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_kernel_that_never_started_exits_directly() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);

    let events = state.subscribe();
    state.set_status(KernelStatus::Exited, Some(String::from("child process exited")));

    let update = next_status(&events);
    assert_eq!(update.status, KernelStatus::Exited);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_exit_rejects_pending_executions() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);

    let (rx, _) = state
        .executions
        .submit(request("a"), ExecutionMode::Interactive, true)
        .expect("Failed to submit request");

    state.set_status(KernelStatus::Exited, Some(String::from("child process exited")));

    let err = rx
        .try_recv()
        .expect("Rejection should be delivered")
        .expect_err("Execution should be rejected on exit");
    assert!(matches!(err, ElError::SessionTerminated(_)));
    assert!(state.process_id.is_none());
}

#[test]
fn test_offline_restores_prior_status() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);
    state.set_status(KernelStatus::Idle, None);
    state.set_status(KernelStatus::Busy, None);

    state.mark_offline(Some(String::from("lost heartbeat")));
    assert_eq!(state.status, KernelStatus::Offline);

    state.restore_online(Some(String::from("heartbeat detected after offline")));
    assert_eq!(state.status, KernelStatus::Busy);
}

#[test]
fn test_offline_ignored_unless_running() {
    let mut state = state();
    state.mark_offline(Some(String::from("lost heartbeat")));
    assert_eq!(state.status, KernelStatus::Uninitialized);

    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Exited, None);
    state.mark_offline(Some(String::from("lost heartbeat")));
    assert_eq!(state.status, KernelStatus::Exited);
}

#[test]
fn test_offline_rejects_pending_executions() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);
    state.set_status(KernelStatus::Idle, None);

    let (rx, _) = state
        .executions
        .submit(request("a"), ExecutionMode::Interactive, true)
        .expect("Failed to submit request");

    state.mark_offline(Some(String::from("lost heartbeat")));

    let err = rx
        .try_recv()
        .expect("Rejection should be delivered")
        .expect_err("Execution should be rejected when the kernel goes offline");
    assert!(matches!(err, ElError::SessionTerminated(_)));
}

#[test]
fn test_execution_state_busy_honored_only_from_idle() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);

    // Busy chatter before the first idle leaves the status alone
    state.handle_execution_state(ExecutionState::Busy);
    assert_eq!(state.status, KernelStatus::Ready);

    state.handle_execution_state(ExecutionState::Idle);
    assert_eq!(state.status, KernelStatus::Idle);

    state.handle_execution_state(ExecutionState::Busy);
    assert_eq!(state.status, KernelStatus::Busy);
}

#[test]
fn test_execution_state_idle_settles_interrupting() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    state.set_status(KernelStatus::Ready, None);
    state.set_status(KernelStatus::Idle, None);
    state.set_status(KernelStatus::Busy, None);
    state.set_status(KernelStatus::Interrupting, None);

    state.handle_execution_state(ExecutionState::Idle);
    assert_eq!(state.status, KernelStatus::Idle);
}

#[test]
fn test_execution_state_starting_is_ignored() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);

    state.handle_execution_state(ExecutionState::Starting);
    assert_eq!(state.status, KernelStatus::Starting);
}

#[test]
fn test_idle_and_busy_timestamps_follow_status() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);
    assert!(state.idle_since.is_none());

    state.set_status(KernelStatus::Ready, None);
    assert!(state.idle_since.is_some());
    assert!(state.busy_since.is_none());

    state.set_status(KernelStatus::Busy, None);
    assert!(state.idle_since.is_none());
    assert!(state.busy_since.is_some());

    state.set_status(KernelStatus::Idle, None);
    assert!(state.idle_since.is_some());
    assert!(state.busy_since.is_none());
}

#[test]
fn test_late_subscriber_misses_earlier_events() {
    let mut state = state();
    state.set_status(KernelStatus::Starting, None);

    let events = state.subscribe();
    assert!(events.try_recv().is_err());

    state.set_status(KernelStatus::Ready, None);
    assert_eq!(next_status(&events).status, KernelStatus::Ready);
}
