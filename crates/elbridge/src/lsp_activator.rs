//
// lsp_activator.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use elshared::{
    kernel_message::{KernelMessage, KernelStatus},
    session_event::SessionEvent,
};
use tokio::{
    sync::RwLock,
    time::{timeout, Duration},
};

use crate::kernel_state::KernelState;

/// A link to a language server owned by the embedding editor. The session
/// drives this from kernel status changes; the editor supplies the transport.
#[async_trait]
pub trait LspConnection: Send + Sync {
    /// Connect the language server to the given address.
    async fn activate(&self, address: String) -> Result<(), anyhow::Error>;

    /// Disconnect the language server.
    async fn deactivate(&self) -> Result<(), anyhow::Error>;
}

/// Drives a language server connection from a session's status changes:
/// activates it when the kernel becomes ready and deactivates it when the
/// kernel begins shutting down.
#[derive(Clone)]
pub struct LspActivator {
    session_id: String,
    address: String,
    connection: Arc<dyn LspConnection>,
    active: Arc<AtomicBool>,
}

impl LspActivator {
    pub fn new(session_id: String, address: String, connection: Arc<dyn LspConnection>) -> Self {
        Self {
            session_id,
            address,
            connection,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Activate the language server if it isn't active yet. Later calls are
    /// no-ops until the connection is deactivated.
    pub async fn activate_once(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!(
            "[session {}] Activating language server at {}",
            self.session_id,
            self.address
        );
        if let Err(e) = self.connection.activate(self.address.clone()).await {
            self.active.store(false, Ordering::SeqCst);
            log::error!(
                "[session {}] Failed to activate language server: {}",
                self.session_id,
                e
            );
        }
    }

    /// Deactivate the language server, waiting at most 2 seconds for it to
    /// comply. Session teardown does not block on an unresponsive language
    /// server.
    pub async fn deactivate_bounded(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        log::debug!(
            "[session {}] Deactivating language server",
            self.session_id
        );
        match timeout(Duration::from_secs(2), self.connection.deactivate()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!(
                    "[session {}] Language server deactivation failed: {}",
                    self.session_id,
                    e
                );
            }
            Err(_) => {
                log::warn!(
                    "[session {}] Language server did not deactivate within 2s; abandoning",
                    self.session_id
                );
            }
        }
    }

    /// Watch the session's status changes and drive the connection from them.
    /// Returns immediately and runs the watcher in the background.
    ///
    /// An offline kernel keeps its language server attached; the kernel may
    /// come back. Only a shutdown or exit deactivates it.
    pub fn watch(&self, state: Arc<RwLock<KernelState>>) {
        let activator = self.clone();
        tokio::spawn(async move {
            let (events, status) = {
                let mut state = state.write().await;
                (state.subscribe(), state.status)
            };

            // A connection attached to a session that is already running
            // activates right away rather than waiting for a status change
            if matches!(
                status,
                KernelStatus::Ready | KernelStatus::Idle | KernelStatus::Busy
            ) {
                activator.activate_once().await;
            }

            loop {
                match events.recv().await {
                    Ok(SessionEvent::Kernel(KernelMessage::Status(update))) => {
                        match update.status {
                            KernelStatus::Ready => activator.activate_once().await,
                            KernelStatus::Exiting => activator.deactivate_bounded().await,
                            KernelStatus::Exited => {
                                activator.deactivate_bounded().await;
                                break;
                            }
                            _ => {}
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    }
}
