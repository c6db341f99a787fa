//
// execution_queue_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! Tests for interactive queueing, silent execution, and interrupts against
//! a live fake kernel.

#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{adopt_kernel, test_options, FakeKernel};
use elbridge::error::ElError;
use elbridge::execution_tracker::ExecutionMode;
use elbridge::kernel_session::await_status;
use elshared::kernel_message::{KernelMessage, KernelStatus};
use elshared::session_event::SessionEvent;
use event_listener::Event;
use serde_json::json;
use uuid::Uuid;

/// Waits for the session to announce a queued execution and returns its ID.
async fn wait_for_queued(events: &async_channel::Receiver<SessionEvent>) -> String {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("Timed out waiting for the queue notification")
            .expect("Event stream closed");
        if let SessionEvent::Kernel(KernelMessage::ExecutionQueued(id)) = event {
            return id;
        }
    }
}

#[tokio::test]
async fn test_interactive_executions_queue_in_order() {
    let kernel = FakeKernel::start().await;
    let session_id = format!("session-{}", Uuid::new_v4());
    let (kernel, session, _) = adopt_kernel(kernel, test_options(&session_id)).await;
    let events = session.subscribe().await;

    let session_a = session.clone();
    let exec_a = tokio::spawn(async move {
        session_a
            .execute(String::from("first"), ExecutionMode::Interactive)
            .await
    });

    // The kernel receives the first request and starts it without finishing
    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let request = kernel.recv_shell().await;
        assert_eq!(request.content["code"], "first");
        kernel.begin_execution(&request).await;
        (kernel, request)
    });
    let (mut kernel, request_a) = kernel_task.await.expect("Kernel task panicked");

    // A second interactive request queues behind the running one
    let session_b = session.clone();
    let exec_b = tokio::spawn(async move {
        session_b
            .execute(String::from("second"), ExecutionMode::Interactive)
            .await
    });
    let queued_id = wait_for_queued(&events).await;

    // Finishing the first execution dispatches the queued one
    kernel.complete_execution(&request_a, "one").await;
    let request_b = kernel.recv_shell().await;
    assert_eq!(request_b.header.msg_id, queued_id);
    assert_eq!(request_b.content["code"], "second");
    kernel.complete_execution(&request_b, "two").await;

    let result_a = exec_a
        .await
        .expect("Task panicked")
        .expect("First execution should succeed");
    assert_eq!(result_a.text(), "one");

    let result_b = exec_b
        .await
        .expect("Task panicked")
        .expect("Second execution should succeed");
    assert_eq!(result_b.text(), "two");

    assert!(await_status(&session.state, KernelStatus::Idle, Duration::from_secs(5)).await);
    let _ = std::fs::remove_dir_all(&session.session_dir);
}

#[tokio::test]
async fn test_silent_execution_output_not_broadcast() {
    let kernel = FakeKernel::start().await;
    let session_id = format!("session-{}", Uuid::new_v4());
    let (kernel, session, _) = adopt_kernel(kernel, test_options(&session_id)).await;
    let events = session.subscribe().await;

    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let request = kernel.recv_shell().await;
        assert_eq!(request.content["silent"], true);
        assert_eq!(request.content["store_history"], false);
        kernel.complete_execution(&request, "quiet\n").await;
        kernel
    });

    // The result still carries the output for the caller
    let result = session
        .execute(String::from("background_task()"), ExecutionMode::Silent)
        .await
        .expect("Silent execution should succeed");
    assert!(result.succeeded());
    assert_eq!(result.text(), "quiet\n");
    kernel_task.await.expect("Kernel task panicked");

    // Nothing the kernel emitted for this execution reached subscribers
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Jupyter(msg) = event {
            if let Some(parent) = &msg.parent_header {
                assert_ne!(
                    parent.msg_id, result.execution_id,
                    "Output of a silent execution should not be broadcast"
                );
            }
        }
    }

    let _ = std::fs::remove_dir_all(&session.session_dir);
}

#[tokio::test]
async fn test_message_interrupt_discards_queue() {
    let kernel = FakeKernel::start().await;
    let session_id = format!("session-{}", Uuid::new_v4());
    let (kernel, session, _) = adopt_kernel(kernel, test_options(&session_id)).await;
    let events = session.subscribe().await;

    // Start an execution that never finishes on its own
    let session_a = session.clone();
    let exec_a = tokio::spawn(async move {
        session_a
            .execute(String::from("while True: pass"), ExecutionMode::Interactive)
            .await
    });
    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let request = kernel.recv_shell().await;
        kernel.begin_execution(&request).await;
        (kernel, request)
    });
    let (kernel, request_a) = kernel_task.await.expect("Kernel task panicked");
    assert!(await_status(&session.state, KernelStatus::Busy, Duration::from_secs(5)).await);

    // Queue a second request behind it
    let session_b = session.clone();
    let exec_b = tokio::spawn(async move {
        session_b
            .execute(String::from("never_runs()"), ExecutionMode::Interactive)
            .await
    });
    wait_for_queued(&events).await;

    // The kernel acknowledges the interrupt and aborts the running execution
    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let request = kernel.recv_control().await;
        assert_eq!(request.header.msg_type, "interrupt_request");
        kernel
            .reply_control("interrupt_reply", &request.header, json!({ "status": "ok" }))
            .await;
        kernel
            .fail_execution(&request_a, "KeyboardInterrupt", "")
            .await;
        kernel
    });

    session.interrupt().await.expect("Interrupt should succeed");
    kernel_task.await.expect("Kernel task panicked");

    // The running execution resolves with the kernel's error; the queued one
    // is discarded without reaching the kernel
    let result_a = exec_a
        .await
        .expect("Task panicked")
        .expect("Interrupted execution should still resolve");
    assert!(!result_a.succeeded());
    let error = result_a.error.expect("Error payload should be recorded");
    assert_eq!(error["ename"], "KeyboardInterrupt");

    let err = exec_b
        .await
        .expect("Task panicked")
        .expect_err("Queued execution should be discarded");
    assert!(matches!(err, ElError::ExecutionInterrupted(_)));

    assert_eq!(session.state.read().await.status, KernelStatus::Idle);
    let _ = std::fs::remove_dir_all(&session.session_dir);
}

#[tokio::test]
async fn test_interruptible_execution_cancels_on_event() {
    let kernel = FakeKernel::start().await;
    let session_id = format!("session-{}", Uuid::new_v4());
    let (kernel, session, _) = adopt_kernel(kernel, test_options(&session_id)).await;

    let cancel = Arc::new(Event::new());
    let session_exec = session.clone();
    let cancel_exec = cancel.clone();
    let exec = tokio::spawn(async move {
        session_exec
            .execute_interruptible(
                String::from("while True: pass"),
                ExecutionMode::Interactive,
                cancel_exec,
            )
            .await
    });

    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let request = kernel.recv_shell().await;
        kernel.begin_execution(&request).await;

        // Cancellation turns into an interrupt on the control channel
        let interrupt = kernel.recv_control().await;
        assert_eq!(interrupt.header.msg_type, "interrupt_request");
        kernel
            .reply_control("interrupt_reply", &interrupt.header, json!({ "status": "ok" }))
            .await;
        kernel.fail_execution(&request, "KeyboardInterrupt", "").await;
        kernel
    });

    // Give the execution time to register its cancellation listener before
    // firing the event
    assert!(await_status(&session.state, KernelStatus::Busy, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(250)).await;
    cancel.notify(usize::MAX);

    let result = exec
        .await
        .expect("Task panicked")
        .expect("Cancelled execution should still resolve");
    assert!(!result.succeeded());
    kernel_task.await.expect("Kernel task panicked");

    assert_eq!(session.state.read().await.status, KernelStatus::Idle);
    let _ = std::fs::remove_dir_all(&session.session_dir);
}
