//
// session.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel_message::KernelStatus;

/// How the kernel prefers to be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    /// Deliver an interrupt signal (SIGINT) to the kernel process
    Signal,

    /// Send an `interrupt_request` message on the control channel
    Message,
}

/// The options used to create a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// The session ID. Must be unique for the lifetime of the embedding
    /// process.
    pub session_id: String,

    /// The username to send in message headers
    pub username: String,

    /// The command line used to start the kernel. The first element is the
    /// path to the kernel itself; an argument containing `{connection_file}`
    /// is replaced with the path to the generated connection file.
    pub argv: Vec<String>,

    /// The working directory in which to start the kernel. If empty or
    /// unreadable, the kernel inherits the current directory.
    pub working_directory: Option<String>,

    /// How to interrupt the kernel
    pub interrupt_mode: InterruptMode,

    /// How long to wait, in seconds, for the kernel's sockets to connect
    /// before giving up on startup
    pub connection_timeout: u64,
}

impl SessionOptions {
    pub fn new(session_id: String, username: String, argv: Vec<String>) -> Self {
        Self {
            session_id,
            username,
            argv,
            working_directory: None,
            interrupt_mode: InterruptMode::Signal,
            connection_timeout: 30,
        }
    }
}

/// A point-in-time summary of a session, for display and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// The session ID
    pub session_id: String,

    /// The username that owns the session
    pub username: String,

    /// The session's current status
    pub status: KernelStatus,

    /// The kernel's process ID; 0 until the kernel process has started
    pub process_id: i32,

    /// The date and time the session was created
    pub started: DateTime<Utc>,

    /// The command line used to start the kernel
    pub argv: Vec<String>,

    /// The working directory requested for the kernel
    pub working_directory: Option<String>,

    /// How the kernel is interrupted
    pub interrupt_mode: InterruptMode,

    /// The path to the connection file, if it still exists on disk
    pub connection_file: Option<String>,

    /// The path to the kernel's log file
    pub log_file: String,

    /// Seconds since the kernel last became idle; 0 if the kernel is not idle
    pub idle_seconds: i32,

    /// Seconds since the kernel last became busy; 0 if the kernel is not busy
    pub busy_seconds: i32,

    /// The number of executions that have been submitted but not yet resolved
    pub pending_executions: usize,

    /// The kernel info reply, as reported by the kernel at startup
    pub kernel_info: serde_json::Value,
}
