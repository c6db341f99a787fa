//
// startup.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Kernel startup logic and coordination.

use std::sync::Arc;
use std::{fs, process::Stdio};

use elshared::{kernel_message::KernelStatus, session::SessionOptions};
use tokio::sync::RwLock;

use crate::{error::ElError, kernel_state::KernelState};

use super::process::ProcessMonitor;

/// Coordinates the kernel startup process.
pub struct StartupCoordinator {
    /// Session ID for logging
    pub session_id: String,

    /// The options the session was created with
    pub options: SessionOptions,

    /// Shared kernel state
    pub state: Arc<RwLock<KernelState>>,
}

impl StartupCoordinator {
    /// Validate that the session can be started.
    pub fn validate_startup(&self) -> Result<(), ElError> {
        // Ensure that we have some arguments
        if self.options.argv.is_empty() {
            return Err(ElError::ProcessStartFailed(anyhow::anyhow!(
                "No arguments provided"
            )));
        }
        Ok(())
    }

    /// Substitute the connection file path in argv.
    pub fn substitute_connection_file(
        &self,
        argv: &[String],
        connection_file_path: &std::path::Path,
    ) -> Vec<String> {
        argv.iter()
            .map(|arg| {
                if arg.contains("{connection_file}") {
                    arg.replace("{connection_file}", connection_file_path.to_str().unwrap())
                } else {
                    arg.clone()
                }
            })
            .collect()
    }

    /// Build the command to start the kernel.
    pub fn build_command(&self, argv: &[String]) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);

        // Set the working directory if specified and valid
        if let Some(working_directory) = &self.options.working_directory {
            match fs::metadata(working_directory) {
                Ok(metadata) => {
                    if metadata.is_dir() {
                        cmd.current_dir(working_directory);
                        log::trace!(
                            "[session {}] Set working directory to '{}'",
                            self.session_id,
                            working_directory
                        );
                    } else {
                        log::warn!(
                            "[session {}] Requested working directory '{}' exists but is not a directory; using current directory '{}'",
                            self.session_id,
                            working_directory,
                            match std::env::current_dir() {
                                Ok(dir) => dir.display().to_string(),
                                Err(e) => format!("<error: {}>", e),
                            }
                        );
                    }
                }
                Err(e) => {
                    log::warn!(
                        "[session {}] Requested working directory '{}' could not be read ({}); using current directory '{}'",
                        self.session_id,
                        working_directory,
                        e,
                        match std::env::current_dir() {
                            Ok(dir) => dir.display().to_string(),
                            Err(e) => format!("<error: {}>", e),
                        }
                    );
                }
            }
        }

        cmd
    }

    /// Spawn the kernel process and set up output capture.
    pub async fn spawn_kernel_process(
        &self,
        cmd: &mut tokio::process::Command,
        process_monitor: &ProcessMonitor,
    ) -> Result<tokio::process::Child, ElError> {
        // Spawn the process
        let mut child = match cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to start kernel: {}", e);
                {
                    // Mark kernel as exited since it never started
                    let mut state = self.state.write().await;
                    state.set_status(
                        KernelStatus::Exited,
                        Some(format!("failed to spawn process: {}", e)),
                    );
                }
                return Err(ElError::ProcessStartFailed(anyhow::anyhow!("{}", e)));
            }
        };

        // Capture output streams
        process_monitor.capture_output_streams(&mut child);

        // Get the process ID
        let pid = child.id();
        {
            let mut state = self.state.write().await;
            state.process_id = pid;
            log::trace!(
                "[session {}]: Session child process started with pid {}",
                self.session_id,
                match pid {
                    Some(pid) => pid.to_string(),
                    None => "<none>".to_string(),
                }
            );
        }

        Ok(child)
    }
}
