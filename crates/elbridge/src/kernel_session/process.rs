//
// process.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Child process management for kernel sessions.

use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Sender;
use elshared::{
    kernel_message::{KernelMessage, KernelStatus, OutputStream},
    session_event::SessionEvent,
};
use event_listener::Event;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt};
use tokio::sync::RwLock;

use crate::{error::ElError, kernel_state::KernelState, startup_status::StartupStatus};

/// Monitors a kernel child process and handles its lifecycle.
pub struct ProcessMonitor {
    /// Session ID for logging
    session_id: String,

    /// Shared kernel state
    state: Arc<RwLock<KernelState>>,

    /// Event that fires when the process exits
    exit_event: Arc<Event>,

    /// The session log file; captured kernel output is appended to it
    log_path: PathBuf,
}

impl ProcessMonitor {
    /// Create a new process monitor.
    pub fn new(
        session_id: String,
        state: Arc<RwLock<KernelState>>,
        exit_event: Arc<Event>,
        log_path: PathBuf,
    ) -> Self {
        Self {
            session_id,
            state,
            exit_event,
            log_path,
        }
    }

    /// Capture stdout and stderr from a child process, appending them to the
    /// session log and publishing them to subscribers.
    pub fn capture_output_streams(&self, child: &mut tokio::process::Child) {
        // Capture stdout
        if let Some(stdout) = child.stdout.take() {
            Self::stream_output(
                stdout,
                OutputStream::Stdout,
                self.state.clone(),
                self.log_path.clone(),
            );
        }

        // Capture stderr
        if let Some(stderr) = child.stderr.take() {
            Self::stream_output(
                stderr,
                OutputStream::Stderr,
                self.state.clone(),
                self.log_path.clone(),
            );
        }
    }

    /// Monitor a child process, waiting for it to exit.
    ///
    /// This method blocks until the child process exits, then updates the
    /// kernel state and notifies listeners.
    pub async fn run_child(&self, mut child: tokio::process::Child, startup_tx: Sender<StartupStatus>) {
        // Actually run the kernel! This will block until the kernel exits.
        let status = child.wait().await.expect("Failed to wait on child process");
        let code = status.code().unwrap_or(-1);

        log::info!(
            "Child process for session {} exited with status: {}",
            self.session_id,
            status
        );

        // Check the kernel state. If we were still in the Starting state when
        // the process exited, that's bad.
        {
            let state = self.state.read().await;
            if state.status == KernelStatus::Starting {
                let _ = startup_tx
                    .send(StartupStatus::AbnormalExit(
                        code,
                        ElError::ProcessAbnormalExit(code),
                    ))
                    .await;
            }
        }

        // We are now exited; mark the kernel as such. This rejects any
        // executions still pending.
        {
            let mut state = self.state.write().await;
            state.set_status(
                KernelStatus::Exited,
                Some(String::from("child process exited")),
            );
        }

        // Notify anyone listening that the kernel has exited
        self.exit_event.notify(usize::MAX);

        let mut state = self.state.write().await;
        state.publish(SessionEvent::Kernel(KernelMessage::Exited(code)));
    }

    /// Stream output from a child process.
    ///
    /// This function reads lines from a stream, appends them to the session
    /// log file, and publishes them to session subscribers. It's used to
    /// capture the stdout and stderr of a kernel process.
    ///
    /// # Arguments
    ///
    /// - `stream`: The stream to read from
    /// - `kind`: The kind of output (stdout or stderr)
    /// - `state`: The kernel state owning the subscriber list
    /// - `log_path`: The session log file to append to
    fn stream_output<T: AsyncRead + Unpin + Send + 'static>(
        stream: T,
        kind: OutputStream,
        state: Arc<RwLock<KernelState>>,
        log_path: PathBuf,
    ) {
        tokio::spawn(async move {
            let mut log_file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .await
            {
                Ok(file) => Some(file),
                Err(e) => {
                    log::warn!(
                        "Failed to open kernel log file {}: {}",
                        log_path.display(),
                        e
                    );
                    None
                }
            };

            let mut reader = tokio::io::BufReader::new(Box::pin(stream));
            let mut buffer = String::new();
            loop {
                buffer.clear();
                match reader.read_line(&mut buffer).await {
                    Ok(0) => {
                        log::debug!("End of output stream (kind: {:?})", kind);
                        break;
                    }
                    Ok(_) => {
                        if let Some(ref mut file) = log_file {
                            if let Err(e) = file.write_all(buffer.as_bytes()).await {
                                log::warn!("Failed to write kernel output to log file: {}", e);
                                log_file = None;
                            }
                        }
                        let message = KernelMessage::Output(kind, buffer.to_string());
                        let mut state = state.write().await;
                        state.publish(SessionEvent::Kernel(message));
                    }
                    Err(e) => {
                        log::error!("Failed to read from standard stream: {}", e);
                        break;
                    }
                }
            }
        });
    }
}
