//
// error.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::fmt;

use log::{error, warn};

/// The error type for session and protocol failures.
///
/// Each variant carries a stable `EL-<n>` code derived from its position in
/// the enum; add new variants at the end to keep existing codes stable.
#[derive(Debug)]
pub enum ElError {
    /// No usable port could be allocated for the named channel
    PortExhausted(String),

    /// A message's HMAC signature did not match its payload
    SignatureMismatch(String),

    /// A message part failed to parse; the first field names the part
    MalformedPayload(String, serde_json::Error),

    /// A ZeroMQ message did not have the expected frame layout
    InvalidFrame(String),

    /// An execution was submitted with an ID that is already pending
    DuplicateExecutionId(String),

    /// The session exited or went offline with executions outstanding
    SessionTerminated(String),

    /// An execution was discarded before it reached the kernel
    ExecutionInterrupted(String),

    /// The kernel did not connect within the startup window
    StartupTimeout(u64),

    /// The kernel did not settle after an interrupt within the bounded wait
    InterruptTimeout(u64),

    /// The kernel did not exit after a shutdown request within the bounded wait
    ShutdownTimeout(u64),

    /// An operation that needs a running kernel was called before start
    SessionNotStarted(String),

    /// The kernel process could not be spawned
    ProcessStartFailed(anyhow::Error),

    /// The kernel process exited before it finished starting
    ProcessAbnormalExit(i32),

    /// The kernel's sockets could not be connected
    SessionConnectionFailed(anyhow::Error),

    /// The kernel process exited while we were waiting for sockets to connect
    ExitedBeforeConnection,

    /// The session's on-disk state could not be created or removed
    SessionStorageFailed(anyhow::Error),

    /// An internal channel closed unexpectedly
    ChannelClosed(String),
}

impl fmt::Display for ElError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error EL-{}: ", self.discriminant())?;
        match self {
            ElError::PortExhausted(name) => {
                write!(f, "Could not allocate an unused {} port", name)
            }
            ElError::SignatureMismatch(detail) => {
                write!(f, "HMAC signature mismatch on {} message", detail)
            }
            ElError::MalformedPayload(part, err) => {
                write!(f, "Failed to parse message {}: {}", part, err)
            }
            ElError::InvalidFrame(detail) => {
                write!(f, "Malformed wire message: {}", detail)
            }
            ElError::DuplicateExecutionId(id) => {
                write!(f, "Execution '{}' is already pending", id)
            }
            ElError::SessionTerminated(reason) => {
                write!(f, "Session terminated: {}", reason)
            }
            ElError::ExecutionInterrupted(id) => {
                write!(f, "Execution '{}' was discarded before running", id)
            }
            ElError::StartupTimeout(secs) => {
                write!(f, "Kernel did not connect within {} seconds", secs)
            }
            ElError::InterruptTimeout(secs) => {
                write!(
                    f,
                    "Kernel did not become idle within {} seconds of interrupt",
                    secs
                )
            }
            ElError::ShutdownTimeout(secs) => {
                write!(
                    f,
                    "Kernel did not exit within {} seconds of shutdown request",
                    secs
                )
            }
            ElError::SessionNotStarted(session_id) => {
                write!(f, "Session {} has not been started", session_id)
            }
            ElError::ProcessStartFailed(err) => {
                write!(f, "Failed to start kernel process: {}", err)
            }
            ElError::ProcessAbnormalExit(code) => {
                write!(f, "Kernel process exited during startup with code {}", code)
            }
            ElError::SessionConnectionFailed(err) => {
                write!(f, "Failed to connect to kernel sockets: {}", err)
            }
            ElError::ExitedBeforeConnection => {
                write!(f, "Kernel process exited before its sockets connected")
            }
            ElError::SessionStorageFailed(err) => {
                write!(f, "Failed to manage session files: {}", err)
            }
            ElError::ChannelClosed(what) => {
                write!(f, "Internal channel '{}' closed unexpectedly", what)
            }
        }
    }
}

impl std::error::Error for ElError {}

impl ElError {
    #[allow(unsafe_code, trivial_casts)]
    fn discriminant(&self) -> u8 {
        unsafe { *(self as *const Self as *const u8) }
    }

    /// Log the error at the appropriate level. Timeouts on bounded waits are
    /// best-effort completions, so they log as warnings rather than errors.
    pub fn log(&self) {
        match self {
            ElError::InterruptTimeout(_) | ElError::ShutdownTimeout(_) => {
                warn!("{}", self)
            }
            _ => error!("{}", self),
        }
    }
}
