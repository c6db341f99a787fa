//
// lifecycle.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Kernel lifecycle management (interrupt, shutdown, restart).

use std::sync::Arc;

use async_channel::{SendError, Sender};
use elshared::{
    jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader},
    session::InterruptMode,
};
use tokio::sync::RwLock;

use crate::{error::ElError, kernel_state::KernelState};

use super::utils::make_message_id;

/// Manages kernel lifecycle operations.
pub struct LifecycleManager {
    /// Session ID for logging
    session_id: String,

    /// Shared kernel state
    state: Arc<RwLock<KernelState>>,

    /// Channel to send messages to the kernel's sockets
    zmq_tx: Sender<JupyterMessage>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager.
    pub fn new(
        session_id: String,
        state: Arc<RwLock<KernelState>>,
        zmq_tx: Sender<JupyterMessage>,
    ) -> Self {
        Self {
            session_id,
            state,
            zmq_tx,
        }
    }

    /// Shutdown the kernel.
    pub async fn shutdown(&self) -> Result<(), ElError> {
        self.shutdown_request(false)
            .await
            .map_err(|_| ElError::ChannelClosed(String::from("outbound message channel")))
    }

    /// Shutdown the kernel in preparation for a restart. The kernel keeps its
    /// per-session state (such as history) when the request carries the
    /// restart flag.
    pub async fn shutdown_for_restart(&self) -> Result<(), ElError> {
        self.shutdown_request(true)
            .await
            .map_err(|_| ElError::ChannelClosed(String::from("outbound message channel")))
    }

    /// Send a shutdown request to the kernel.
    async fn shutdown_request(&self, restart: bool) -> Result<(), SendError<JupyterMessage>> {
        let msg = JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: make_message_id(),
                msg_type: "shutdown_request".to_string(),
            },
            parent_header: None,
            metadata: serde_json::json!({}),
            content: serde_json::json!({
                "restart": restart,
            }),
            channel: JupyterChannel::Control,
            buffers: vec![],
        };

        log::debug!(
            "[session {}] Sending shutdown request (restart: {})",
            self.session_id,
            restart
        );
        self.zmq_tx.send(msg).await
    }

    /// Interrupt the kernel.
    ///
    /// Sends an interrupt to the kernel, either as a SIGINT to its process or
    /// as a Jupyter message on the control channel, per the kernel's declared
    /// interrupt mode.
    pub async fn interrupt(&self, interrupt_mode: InterruptMode) -> Result<(), anyhow::Error> {
        match interrupt_mode {
            InterruptMode::Signal => {
                use sysinfo::{Pid, Signal, System};
                let pid = self.state.read().await.process_id.unwrap_or(0);
                if pid == 0 {
                    return Err(anyhow::anyhow!("No process ID to interrupt"));
                }
                let mut system = System::new();
                let pid = Pid::from_u32(pid);
                system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]));
                if let Some(process) = system.process(pid) {
                    if process.kill_with(Signal::Interrupt).is_none() {
                        return Err(anyhow::anyhow!(
                            "Interrupt signal not supported on this platform"
                        ));
                    }
                } else {
                    return Err(anyhow::anyhow!("Process {} not found", pid));
                }
            }
            InterruptMode::Message => {
                let msg = JupyterMessage {
                    header: JupyterMessageHeader {
                        msg_id: make_message_id(),
                        msg_type: "interrupt_request".to_string(),
                    },
                    parent_header: None,
                    metadata: serde_json::json!({}),
                    content: serde_json::json!({}),
                    channel: JupyterChannel::Control,
                    buffers: vec![],
                };
                self.zmq_tx.send(msg).await?;
            }
        }
        Ok(())
    }
}
