//
// kernel_state.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use async_channel::{Receiver, Sender};
use elshared::{
    kernel_message::{KernelMessage, KernelStatus, StatusUpdate},
    session_event::SessionEvent,
};

use crate::{execution_tracker::ExecutionTracker, jupyter_messages::ExecutionState};

/// The mutable state of the kernel.
///
/// Does not implement the Clone trait; only one instance of the kernel state
/// should exist at a time.
#[derive(Debug)]
pub struct KernelState {
    /// The session ID for this kernel instance.
    pub session_id: String,

    /// The kernel's current status.
    pub status: KernelStatus,

    /// The status the kernel held before it went offline. Restored if the
    /// heartbeat resumes.
    offline_from: Option<KernelStatus>,

    /// The current process ID of the kernel, or None if the kernel is not running.
    pub process_id: Option<u32>,

    /// The unresolved executions for this session.
    pub executions: ExecutionTracker,

    /// The kernel info reply received at startup, if any.
    pub kernel_info: Option<serde_json::Value>,

    /// The time at which the kernel last became idle.
    pub idle_since: Option<std::time::Instant>,

    /// The time at which the kernel last became busy.
    pub busy_since: Option<std::time::Instant>,

    /// Channels over which session events are published.
    subscribers: Vec<Sender<SessionEvent>>,
}

impl KernelState {
    /// Create a new kernel state.
    pub fn new(session_id: String) -> Self {
        KernelState {
            session_id: session_id.clone(),
            status: KernelStatus::Uninitialized,
            offline_from: None,
            process_id: None,
            executions: ExecutionTracker::new(session_id),
            kernel_info: None,
            idle_since: None,
            busy_since: None,
            subscribers: Vec::new(),
        }
    }

    /// Subscribe to session events. Events published before this call are not
    /// replayed.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&mut self, event: SessionEvent) {
        // Deliver to a snapshot of the subscriber list; a subscriber added
        // while this notification is being delivered must not receive it
        let subscribers = self.subscribers.clone();
        for tx in &subscribers {
            if let Err(e) = tx.try_send(event.clone()) {
                log::trace!(
                    "[session {}] Dropping event for closed subscriber: {}",
                    self.session_id,
                    e
                );
            }
        }
        self.subscribers.retain(|tx| !tx.is_closed());
    }

    /// Set the kernel's status.
    ///
    /// `Exited` is terminal; once it is reached no further status changes or
    /// notifications occur. Reaching `Exited` from a running state passes
    /// through `Exiting` first so subscribers always observe the teardown.
    pub fn set_status(&mut self, status: KernelStatus, reason: Option<String>) {
        log::debug!(
            "[session {}] status '{}' => '{}' {}",
            self.session_id,
            self.status,
            status,
            match reason {
                Some(ref r) => format!("({})", r),
                None => "".to_string(),
            }
        );

        // If the status didn't change, don't perform any side effects or
        // notify subscribers.
        if self.status == status {
            return;
        }

        if self.status == KernelStatus::Exited {
            log::trace!(
                "[session {}] Ignoring status change to '{}' after exit",
                self.session_id,
                status
            );
            return;
        }

        // A crash or shutdown from a running state announces Exiting before
        // Exited; a kernel that died without ever becoming ready goes
        // straight to Exited.
        if status == KernelStatus::Exited
            && matches!(
                self.status,
                KernelStatus::Ready
                    | KernelStatus::Idle
                    | KernelStatus::Busy
                    | KernelStatus::Interrupting
                    | KernelStatus::Offline
            )
        {
            self.apply_status(KernelStatus::Exiting, reason.clone());
        }

        self.apply_status(status, reason);
    }

    /// Apply a status change: record it, run its side effects, and notify
    /// subscribers.
    fn apply_status(&mut self, status: KernelStatus, reason: Option<String>) {
        if status == KernelStatus::Offline {
            self.offline_from = Some(self.status);
        }

        self.status = status;

        // When the kernel dies or goes silent, nothing pending can ever
        // resolve; reject it all rather than leaving callers waiting
        if status == KernelStatus::Exited {
            let detail = reason.as_deref().unwrap_or("kernel exited");
            self.executions.reject_all(detail);
            self.process_id = None;
        } else if status == KernelStatus::Offline {
            let detail = reason.as_deref().unwrap_or("kernel went offline");
            self.executions.reject_all(detail);
        }

        // When idle, record the time at which the kernel became idle
        if matches!(
            status,
            KernelStatus::Idle | KernelStatus::Ready | KernelStatus::Exited
        ) {
            self.idle_since = Some(std::time::Instant::now());
        } else {
            self.idle_since = None;
        }

        // When busy, record the time at which the kernel became busy
        if status == KernelStatus::Busy {
            self.busy_since = Some(std::time::Instant::now());
        } else {
            self.busy_since = None;
        }

        let update = StatusUpdate { status, reason };
        self.publish(SessionEvent::Kernel(KernelMessage::Status(update)));
    }

    /// Fold a kernel-reported execution state into the session status.
    ///
    /// Only the transitions the lifecycle admits are taken: busy is honored
    /// from idle, and idle settles ready, busy, and interrupting kernels.
    /// Anything else (busy during an interrupt, chatter during startup or
    /// teardown) leaves the status alone.
    pub fn handle_execution_state(&mut self, state: ExecutionState) {
        match state {
            ExecutionState::Busy => {
                if self.status == KernelStatus::Idle {
                    self.set_status(KernelStatus::Busy, Some(String::from("kernel reported busy")));
                }
            }
            ExecutionState::Idle => match self.status {
                KernelStatus::Ready => {
                    self.set_status(
                        KernelStatus::Idle,
                        Some(String::from("first idle after startup")),
                    );
                }
                KernelStatus::Busy | KernelStatus::Interrupting => {
                    self.set_status(KernelStatus::Idle, Some(String::from("kernel reported idle")));
                }
                _ => {}
            },
            ExecutionState::Starting => {
                // Emitted once on iopub at boot; the session is already
                // Starting at that point
            }
        }
    }

    /// Mark the kernel offline after a lost heartbeat. Only a kernel that was
    /// running (ready, idle, or busy) can go offline.
    pub fn mark_offline(&mut self, reason: Option<String>) {
        if matches!(
            self.status,
            KernelStatus::Ready | KernelStatus::Idle | KernelStatus::Busy
        ) {
            self.set_status(KernelStatus::Offline, reason);
        }
    }

    /// Restore the status the kernel held before it went offline.
    pub fn restore_online(&mut self, reason: Option<String>) {
        if self.status != KernelStatus::Offline {
            return;
        }
        let prior = self.offline_from.take().unwrap_or(KernelStatus::Idle);
        self.set_status(prior, reason);
    }

    /// Save the kernel info reply received at startup.
    pub fn set_kernel_info(&mut self, info: serde_json::Value) {
        self.kernel_info = Some(info);
    }
}
