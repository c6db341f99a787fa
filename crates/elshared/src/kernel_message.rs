//
// kernel_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::fmt;

use serde::{Deserialize, Serialize};

/// A superset of Jupyter kernel statuses.
///
/// These statuses cover the whole lifecycle of a session, from before the
/// kernel process exists (`Uninitialized`) to after it has gone (`Exited`).
/// The `Busy`/`Idle` pair mirrors the kernel's own execution state reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    /// The kernel has not yet started
    Uninitialized,
    /// The kernel is in the process of starting
    Starting,
    /// The kernel has connected and replied to a kernel info request, but has
    /// not yet reported itself idle
    Ready,
    /// The kernel is idle
    Idle,
    /// The kernel is busy
    Busy,
    /// An interrupt has been requested and the kernel has not yet settled
    Interrupting,
    /// The kernel has been asked to shut down (or its process has begun to die)
    Exiting,
    /// The kernel has exited
    Exited,
    /// The kernel is offline (it has not responded to a heartbeat message in
    /// the expected time)
    Offline,
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            KernelStatus::Uninitialized => "uninitialized",
            KernelStatus::Starting => "starting",
            KernelStatus::Ready => "ready",
            KernelStatus::Idle => "idle",
            KernelStatus::Busy => "busy",
            KernelStatus::Interrupting => "interrupting",
            KernelStatus::Exiting => "exiting",
            KernelStatus::Exited => "exited",
            KernelStatus::Offline => "offline",
        };
        write!(f, "{}", name)
    }
}

/// A status change, along with the reason it happened (if known).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// The new status
    pub status: KernelStatus,

    /// The reason for the change, for logging and diagnostics
    pub reason: Option<String>,
}

/// The output streams of the kernel process itself (not Jupyter `stream`
/// messages; those arrive over iopub).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Messages that are sent from Elara to the client about the kernel itself.
/// For messages bridging the Jupyter protocol, see `JupyterMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelMessage {
    /// The kernel's status has changed
    Status(StatusUpdate),

    /// The kernel process emitted output on stdout or stderr
    Output(OutputStream, String),

    /// An execution request was queued behind the active one rather than
    /// delivered to the kernel immediately
    ExecutionQueued(String),

    /// The kernel has exited
    Exited(i32),
}
