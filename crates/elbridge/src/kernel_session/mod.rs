//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Wraps Jupyter kernel sessions.

mod lifecycle;
mod process;
mod startup;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use elshared::{
    jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader},
    kernel_message::{KernelMessage, KernelStatus},
    session::{SessionInfo, SessionOptions},
    session_event::SessionEvent,
};
use event_listener::Event;
use tokio::sync::RwLock;
use tokio::time::Duration;

use crate::{
    connection_file::ConnectionFile,
    error::ElError,
    execution_tracker::{ExecutionMode, ExecutionReceiver, ExecutionResult},
    kernel_connection::{self, KernelConnection},
    kernel_state::KernelState,
    lsp_activator::{LspActivator, LspConnection},
    startup_status::StartupStatus,
    zmq_proxy::ZmqProxy,
};

use lifecycle::LifecycleManager;
use process::ProcessMonitor;
use startup::StartupCoordinator;

// Re-export utility functions for external use
pub use utils::{await_status, make_message_id};

/// A Jupyter kernel session.
///
/// This object represents an instance of a Jupyter kernel. It consists of only
/// immutable state so that it can safely be cloned; all mutable kernel state is
/// stored in the `KernelState` object.
#[derive(Clone)]
pub struct KernelSession {
    /// Metadata about the session
    pub connection: KernelConnection,

    /// The options the session was created with
    pub options: SessionOptions,

    /// The current state of the kernel
    pub state: Arc<RwLock<KernelState>>,

    /// The current set of reserved ports for all kernels
    pub reserved_ports: Arc<std::sync::RwLock<Vec<i32>>>,

    /// The date and time the session was created
    pub started: DateTime<Utc>,

    /// The connection descriptor naming the kernel's sockets
    pub connection_file: ConnectionFile,

    /// The directory holding the session's on-disk state
    pub session_dir: PathBuf,

    /// The session log file; captured kernel output accumulates here
    pub log_path: PathBuf,

    /// The channel to send messages to the kernel
    pub zmq_tx: Sender<JupyterMessage>,

    /// The channel the proxy reads outbound messages from
    pub zmq_rx: Receiver<JupyterMessage>,

    /// The exit event; fires when the kernel process exits
    pub exit_event: Arc<Event>,

    /// The language server activator, when one is attached
    lsp: Arc<RwLock<Option<LspActivator>>>,
}

impl KernelSession {
    /// Create a new kernel session.
    ///
    /// Allocates the session's ports, generates its signing key, and writes
    /// its connection descriptor. If any of that fails, the session directory
    /// is removed before the error surfaces.
    pub fn new(
        options: SessionOptions,
        reserved_ports: Arc<std::sync::RwLock<Vec<i32>>>,
    ) -> Result<Self, ElError> {
        let key = kernel_connection::generate_key();
        let connection = KernelConnection::new(
            options.session_id.clone(),
            options.username.clone(),
            key.clone(),
        )
        .map_err(ElError::SessionConnectionFailed)?;

        // Create the session directory. The name carries a nonce so a session
        // restarted under the same ID gets a fresh directory.
        let session_dir = std::env::temp_dir().join(format!(
            "elara-session-{}-{}",
            options.session_id,
            make_message_id()
        ));
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;

        // Allocate ports and write the connection descriptor
        let connection_file = match ConnectionFile::generate(
            String::from("127.0.0.1"),
            reserved_ports.clone(),
            key,
        ) {
            Ok(file) => file,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&session_dir);
                return Err(e);
            }
        };
        if let Err(e) = connection_file.to_file(session_dir.join("connection.json")) {
            connection_file.release_ports(&reserved_ports);
            let _ = std::fs::remove_dir_all(&session_dir);
            return Err(e);
        }

        Ok(Self::assemble(
            options,
            connection,
            connection_file,
            session_dir,
            reserved_ports,
        ))
    }

    /// Create a session around a kernel that is already running, given its
    /// connection file. Call `connect` afterwards to attach to it.
    pub fn adopted(
        options: SessionOptions,
        connection_file: ConnectionFile,
        reserved_ports: Arc<std::sync::RwLock<Vec<i32>>>,
    ) -> Result<Self, ElError> {
        let connection = KernelConnection::new(
            options.session_id.clone(),
            options.username.clone(),
            connection_file.info.key.clone(),
        )
        .map_err(ElError::SessionConnectionFailed)?;

        let session_dir = std::env::temp_dir().join(format!(
            "elara-session-{}-{}",
            options.session_id,
            make_message_id()
        ));
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;

        // Keep the session's own copy of the descriptor so dispose behaves
        // the same for adopted and owned kernels
        if let Err(e) = connection_file.to_file(session_dir.join("connection.json")) {
            let _ = std::fs::remove_dir_all(&session_dir);
            return Err(e);
        }

        Ok(Self::assemble(
            options,
            connection,
            connection_file,
            session_dir,
            reserved_ports,
        ))
    }

    fn assemble(
        options: SessionOptions,
        connection: KernelConnection,
        connection_file: ConnectionFile,
        session_dir: PathBuf,
        reserved_ports: Arc<std::sync::RwLock<Vec<i32>>>,
    ) -> Self {
        let (zmq_tx, zmq_rx) = async_channel::unbounded::<JupyterMessage>();
        let state = Arc::new(RwLock::new(KernelState::new(options.session_id.clone())));
        let log_path = session_dir.join("kernel.log");

        KernelSession {
            connection,
            options,
            state,
            reserved_ports,
            started: Utc::now(),
            connection_file,
            session_dir,
            log_path,
            zmq_tx,
            zmq_rx,
            exit_event: Arc::new(Event::new()),
            lsp: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the kernel.
    ///
    /// # Returns
    ///
    /// The kernel info, as a JSON object.
    pub async fn start(&self) -> Result<serde_json::Value, ElError> {
        // Create the startup coordinator
        let coordinator = StartupCoordinator {
            session_id: self.connection.session_id.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
        };

        // Validate that the session can be started
        coordinator.validate_startup()?;

        // Mark the kernel as starting
        {
            let mut state = self.state.write().await;
            state.set_status(
                KernelStatus::Starting,
                Some(String::from("start requested")),
            );
        }

        // Substitute connection file path in arguments
        let connection_file_path = self.session_dir.join("connection.json");
        let argv =
            coordinator.substitute_connection_file(&self.options.argv, &connection_file_path);

        log::debug!(
            "Starting kernel for session {}: {:?}",
            self.connection.session_id,
            argv
        );

        // Build the command
        let mut cmd = coordinator.build_command(&argv);

        // Create a channel to receive startup status
        let (startup_tx, startup_rx) = async_channel::unbounded::<StartupStatus>();

        // Create the process monitor and spawn the kernel process
        let process_monitor = ProcessMonitor::new(
            self.connection.session_id.clone(),
            self.state.clone(),
            self.exit_event.clone(),
            self.log_path.clone(),
        );
        let child = coordinator
            .spawn_kernel_process(&mut cmd, &process_monitor)
            .await?;

        // Spawn a task to monitor the child process
        let startup_child_tx = startup_tx.clone();
        tokio::spawn(async move {
            process_monitor.run_child(child, startup_child_tx).await;
        });

        // Start the ZeroMQ proxy
        let kernel = self.clone();
        let startup_proxy_tx = startup_tx.clone();
        tokio::spawn(async move {
            kernel.start_zmq_proxy(startup_proxy_tx).await;
        });

        // Wait for the kernel to connect
        log::trace!(
            "[session {}] Waiting for kernel sockets to connect",
            self.connection.session_id
        );
        let startup_result = startup_rx.recv().await;
        log::trace!("[session {}] Waiting complete", self.connection.session_id);

        match startup_result {
            Ok(StartupStatus::Connected(kernel_info)) => {
                // Save the kernel info
                {
                    let mut state = self.state.write().await;
                    state.set_kernel_info(kernel_info.clone());
                }
                Ok(kernel_info)
            }
            Ok(StartupStatus::ConnectionFailed(e)) => {
                let mut state = self.state.write().await;
                state.set_status(
                    KernelStatus::Exited,
                    Some(format!("startup failed: {}", e)),
                );
                Err(e)
            }
            // The process monitor has already marked the session exited
            Ok(StartupStatus::AbnormalExit(_, e)) => Err(e),
            Err(e) => Err(ElError::SessionConnectionFailed(anyhow::anyhow!("{}", e))),
        }
    }

    /// Connect to an existing kernel.
    ///
    /// This is used when adopting a kernel that is already running.
    pub async fn connect(&self) -> Result<serde_json::Value, ElError> {
        // Mark the kernel as starting
        {
            let mut state = self.state.write().await;
            state.set_status(
                KernelStatus::Starting,
                Some(String::from("adopting running kernel")),
            );
        }

        // Create a channel to receive startup status
        let (startup_tx, startup_rx) = async_channel::unbounded::<StartupStatus>();

        // Start the ZeroMQ proxy
        let kernel = self.clone();
        tokio::spawn(async move {
            log::debug!(
                "[session {}] Starting ZeroMQ proxy for adopted kernel",
                kernel.connection.session_id
            );

            kernel.start_zmq_proxy(startup_tx).await;

            log::debug!(
                "[session {}] ZeroMQ proxy for adopted kernel has exited",
                kernel.connection.session_id
            );

            // Mark kernel as exited
            {
                let mut state = kernel.state.write().await;
                kernel.exit_event.notify(usize::MAX);
                state.set_status(
                    KernelStatus::Exited,
                    Some(String::from(
                        "all sockets disconnected from an adopted kernel",
                    )),
                );
            }
        });

        // Wait for the proxy to connect
        let startup_result = startup_rx.recv().await;
        match startup_result {
            Ok(StartupStatus::Connected(kernel_info)) => {
                log::trace!(
                    "[session {}] Kernel sockets connected successfully; kernel successfully adopted",
                    self.connection.session_id
                );
                // Save the kernel info
                {
                    let mut state = self.state.write().await;
                    state.set_kernel_info(kernel_info.clone());
                }
                Ok(kernel_info)
            }
            Ok(StartupStatus::ConnectionFailed(e)) => {
                log::error!(
                    "[session {}] Failed to connect to adopted kernel: {}",
                    self.connection.session_id,
                    e
                );
                {
                    let mut state = self.state.write().await;
                    state.set_status(
                        KernelStatus::Exited,
                        Some(format!("startup failed: {}", e)),
                    );
                }
                Err(e)
            }
            Ok(StartupStatus::AbnormalExit(_, e)) => Err(e),
            Err(e) => Err(ElError::SessionConnectionFailed(anyhow::anyhow!("{}", e))),
        }
    }

    /// Execute code in the kernel and wait for the result.
    ///
    /// Interactive executions queue behind the active interactive execution;
    /// silent and transient executions are delivered immediately.
    pub async fn execute(
        &self,
        code: String,
        mode: ExecutionMode,
    ) -> Result<ExecutionResult, ElError> {
        let result_rx = self.submit_execution(code, mode).await?;
        match result_rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(ElError::SessionTerminated(String::from(
                "result channel closed",
            ))),
        }
    }

    /// Execute code in the kernel, interrupting it if the given cancellation
    /// event fires before the execution resolves.
    ///
    /// The interrupt is delivered once; after that the call keeps waiting for
    /// the execution to resolve, since the kernel decides when (and whether)
    /// the interrupt takes effect.
    pub async fn execute_interruptible(
        &self,
        code: String,
        mode: ExecutionMode,
        cancel: Arc<Event>,
    ) -> Result<ExecutionResult, ElError> {
        let result_rx = self.submit_execution(code, mode).await?;

        let cancel_listener = cancel.listen();
        tokio::select! {
            result = result_rx.recv() => {
                return match result {
                    Ok(result) => result,
                    Err(_) => Err(ElError::SessionTerminated(String::from(
                        "result channel closed",
                    ))),
                };
            }
            _ = cancel_listener => {
                log::debug!(
                    "[session {}] Execution cancelled; interrupting kernel",
                    self.connection.session_id
                );
                self.interrupt().await?;
            }
        }

        match result_rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(ElError::SessionTerminated(String::from(
                "result channel closed",
            ))),
        }
    }

    /// Register an execution with the tracker and deliver it to the kernel if
    /// it isn't queued.
    async fn submit_execution(
        &self,
        code: String,
        mode: ExecutionMode,
    ) -> Result<ExecutionReceiver, ElError> {
        // Reject sessions that cannot run code
        {
            let state = self.state.read().await;
            match state.status {
                KernelStatus::Uninitialized => {
                    return Err(ElError::SessionNotStarted(
                        self.connection.session_id.clone(),
                    ));
                }
                KernelStatus::Exited => {
                    return Err(ElError::SessionTerminated(String::from(
                        "kernel has exited",
                    )));
                }
                KernelStatus::Exiting => {
                    return Err(ElError::SessionTerminated(String::from(
                        "kernel is shutting down",
                    )));
                }
                KernelStatus::Offline => {
                    return Err(ElError::SessionTerminated(String::from(
                        "kernel is offline",
                    )));
                }
                _ => {}
            }
        }

        // A kernel that hasn't reported its first idle yet usually will
        // momentarily; wait for it briefly rather than failing the request
        {
            let status = self.state.read().await.status;
            if matches!(status, KernelStatus::Starting | KernelStatus::Ready) {
                await_status(&self.state, KernelStatus::Idle, Duration::from_secs(5)).await;
            }
        }

        let request = JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: make_message_id(),
                msg_type: "execute_request".to_string(),
            },
            parent_header: None,
            channel: JupyterChannel::Shell,
            content: serde_json::json!({
                "code": code,
                "silent": mode == ExecutionMode::Silent,
                "store_history": mode == ExecutionMode::Interactive,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": mode == ExecutionMode::Interactive,
            }),
            metadata: serde_json::json!({}),
            buffers: vec![],
        };
        let execution_id = request.header.msg_id.clone();

        let (result_rx, dispatch) = {
            let mut state = self.state.write().await;
            let (result_rx, dispatch) =
                state
                    .executions
                    .submit(request, mode, mode == ExecutionMode::Interactive)?;
            if dispatch.is_some() && state.status == KernelStatus::Idle {
                state.set_status(
                    KernelStatus::Busy,
                    Some(String::from("execution submitted")),
                );
            }
            if dispatch.is_none() {
                state.publish(SessionEvent::Kernel(KernelMessage::ExecutionQueued(
                    execution_id,
                )));
            }
            (result_rx, dispatch)
        };

        if let Some(request) = dispatch {
            if self.zmq_tx.send(request).await.is_err() {
                let mut state = self.state.write().await;
                state
                    .executions
                    .reject_all("outbound message channel closed");
                return Err(ElError::ChannelClosed(String::from(
                    "outbound message channel",
                )));
            }
        }

        Ok(result_rx)
    }

    /// Interrupt the kernel.
    ///
    /// Discards queued executions, delivers the interrupt per the kernel's
    /// declared mode, and waits up to 5 seconds for the kernel to report
    /// idle. The active execution keeps waiting for its resolution.
    pub async fn interrupt(&self) -> Result<(), ElError> {
        {
            let mut state = self.state.write().await;
            if !matches!(state.status, KernelStatus::Busy | KernelStatus::Idle) {
                log::debug!(
                    "[session {}] Ignoring interrupt request; kernel is {}",
                    self.connection.session_id,
                    state.status
                );
                return Ok(());
            }
            state.set_status(
                KernelStatus::Interrupting,
                Some(String::from("interrupt requested")),
            );
            state.executions.clear_queued();
        }

        let lifecycle = self.lifecycle_manager();
        if let Err(e) = lifecycle.interrupt(self.options.interrupt_mode).await {
            // The kernel may be exiting underneath us; the bounded wait
            // below settles the final state
            log::error!(
                "[session {}] Failed to deliver interrupt: {}",
                self.connection.session_id,
                e
            );
        }

        if !await_status(&self.state, KernelStatus::Idle, Duration::from_secs(5)).await {
            let mut state = self.state.write().await;
            if state.status == KernelStatus::Interrupting {
                ElError::InterruptTimeout(5).log();
                state.set_status(
                    KernelStatus::Idle,
                    Some(String::from("interrupt wait elapsed")),
                );
            }
        }
        Ok(())
    }

    /// Shut down the kernel. Idempotent; shutting down a kernel that has
    /// already exited does nothing.
    pub async fn shutdown(&self) -> Result<(), ElError> {
        {
            let state = self.state.read().await;
            match state.status {
                KernelStatus::Exited => return Ok(()),
                KernelStatus::Uninitialized => {
                    return Err(ElError::SessionNotStarted(
                        self.connection.session_id.clone(),
                    ));
                }
                _ => {}
            }
        }

        // Detach the language server before asking the kernel to exit
        if let Some(lsp) = self.lsp.read().await.as_ref() {
            lsp.deactivate_bounded().await;
        }

        {
            let mut state = self.state.write().await;
            state.set_status(
                KernelStatus::Exiting,
                Some(String::from("shutdown requested")),
            );
            state.executions.clear_queued();
        }

        let lifecycle = self.lifecycle_manager();
        lifecycle.shutdown().await?;

        if !await_status(&self.state, KernelStatus::Exited, Duration::from_secs(5)).await {
            ElError::ShutdownTimeout(5).log();
        }
        Ok(())
    }

    /// Restart the kernel.
    ///
    /// Shuts the kernel down, disposes this session's on-disk state, and
    /// starts a successor session under the same ID with fresh ports and a
    /// fresh signing key. Returns the successor.
    pub async fn restart(&self) -> Result<KernelSession, ElError> {
        let status = self.state.read().await.status;
        if status == KernelStatus::Uninitialized {
            return Err(ElError::SessionNotStarted(
                self.connection.session_id.clone(),
            ));
        }

        if status != KernelStatus::Exited {
            if let Some(lsp) = self.lsp.read().await.as_ref() {
                lsp.deactivate_bounded().await;
            }
            {
                let mut state = self.state.write().await;
                state.set_status(
                    KernelStatus::Exiting,
                    Some(String::from("restart requested")),
                );
                state.executions.clear_queued();
            }
            let lifecycle = self.lifecycle_manager();
            lifecycle.shutdown_for_restart().await?;
            if !await_status(&self.state, KernelStatus::Exited, Duration::from_secs(5)).await {
                ElError::ShutdownTimeout(5).log();
            }
        }

        // Release this session's on-disk state and build the successor
        self.dispose().await?;
        let successor = KernelSession::new(self.options.clone(), self.reserved_ports.clone())?;
        successor.start().await?;
        log::debug!(
            "[session {}] Kernel restarted successfully",
            self.connection.session_id
        );
        Ok(successor)
    }

    /// Remove the session's connection descriptor from disk. Idempotent. The
    /// session log file is left in place.
    pub async fn dispose(&self) -> Result<(), ElError> {
        let connection_file_path = self.session_dir.join("connection.json");
        match std::fs::remove_file(&connection_file_path) {
            Ok(_) => {
                log::trace!(
                    "[session {}] Removed connection file {}",
                    self.connection.session_id,
                    connection_file_path.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::trace!(
                    "[session {}] Connection file already removed",
                    self.connection.session_id
                );
                Ok(())
            }
            Err(e) => Err(ElError::SessionStorageFailed(anyhow::anyhow!(e))),
        }
    }

    /// Subscribe to this session's events: status changes, kernel output,
    /// queued-execution notices, and decoded Jupyter traffic.
    pub async fn subscribe(&self) -> Receiver<SessionEvent> {
        let mut state = self.state.write().await;
        state.subscribe()
    }

    /// Send a raw Jupyter message to the kernel.
    pub async fn send(&self, msg: JupyterMessage) -> Result<(), ElError> {
        self.zmq_tx
            .send(msg)
            .await
            .map_err(|_| ElError::ChannelClosed(String::from("outbound message channel")))
    }

    /// Reply to an input request from the kernel.
    pub async fn reply_input(
        &self,
        parent: JupyterMessageHeader,
        value: String,
    ) -> Result<(), ElError> {
        let msg = JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: make_message_id(),
                msg_type: "input_reply".to_string(),
            },
            parent_header: Some(parent),
            channel: JupyterChannel::Stdin,
            content: serde_json::json!({ "value": value }),
            metadata: serde_json::json!({}),
            buffers: vec![],
        };
        self.send(msg).await
    }

    /// Attach a language server connection to this session. It is activated
    /// when the kernel becomes ready and deactivated when it goes away.
    pub async fn set_lsp(&self, connection: Arc<dyn LspConnection>, address: String) {
        let activator = LspActivator::new(
            self.connection.session_id.clone(),
            address,
            connection,
        );
        activator.watch(self.state.clone());
        let mut lsp = self.lsp.write().await;
        *lsp = Some(activator);
    }

    /// Summarize this session for embedders.
    pub async fn info(&self) -> SessionInfo {
        let state = self.state.read().await;

        // Compute idle and busy times
        let idle_seconds = match state.idle_since {
            Some(instant) => instant.elapsed().as_secs() as i32,
            None => 0,
        };

        let busy_seconds = match state.busy_since {
            Some(instant) => instant.elapsed().as_secs() as i32,
            None => 0,
        };

        SessionInfo {
            session_id: self.connection.session_id.clone(),
            username: self.connection.username.clone(),
            status: state.status,
            process_id: state.process_id.map(|pid| pid as i32).unwrap_or(0),
            started: self.started,
            argv: self.options.argv.clone(),
            working_directory: self.options.working_directory.clone(),
            interrupt_mode: self.options.interrupt_mode,
            connection_file: Some(
                self.session_dir
                    .join("connection.json")
                    .display()
                    .to_string(),
            ),
            log_file: self.log_path.display().to_string(),
            idle_seconds,
            busy_seconds,
            pending_executions: state.executions.len(),
            kernel_info: state.kernel_info.clone().unwrap_or(serde_json::json!({})),
        }
    }

    // Helper methods to create managers

    fn lifecycle_manager(&self) -> LifecycleManager {
        LifecycleManager::new(
            self.connection.session_id.clone(),
            self.state.clone(),
            self.zmq_tx.clone(),
        )
    }

    /// Start the ZeroMQ proxy for this kernel session.
    async fn start_zmq_proxy(&self, status_tx: Sender<StartupStatus>) {
        let mut proxy = ZmqProxy::new(
            self.connection_file.clone(),
            self.connection.clone(),
            self.state.clone(),
            self.zmq_rx.clone(),
            self.exit_event.clone(),
        );

        // Wait for the proxy to connect and the kernel to answer the
        // readiness probe, or for the session to exit
        let connect_or_exit = async {
            tokio::select! {
                result = async {
                    proxy.connect().await?;
                    proxy.get_kernel_info().await
                } => {
                    match result {
                        Ok(info) => Ok(info),
                        Err(e) => Err(ElError::SessionConnectionFailed(e)),
                    }
                },
                _ = self.exit_event.listen() => {
                    Err(ElError::ExitedBeforeConnection)
                }
            }
        };

        let connection_timeout = self.options.connection_timeout;

        match tokio::time::timeout(
            std::time::Duration::new(connection_timeout, 0),
            connect_or_exit,
        )
        .await
        {
            Ok(Ok(info)) => {
                // Sockets are up and the kernel answered; it can take requests
                {
                    let mut state = self.state.write().await;
                    state.set_status(
                        KernelStatus::Ready,
                        Some(String::from("kernel info received")),
                    );
                }
                let _ = status_tx.send(StartupStatus::Connected(info)).await;

                // Listen for messages until the session ends
                if let Err(e) = proxy.listen().await {
                    ElError::SessionConnectionFailed(e).log();
                }
            }
            Ok(Err(e)) => {
                e.log();
                // An exit before connection has already been reported by the
                // process monitor
                if matches!(e, ElError::SessionConnectionFailed(_)) {
                    let _ = status_tx.send(StartupStatus::ConnectionFailed(e)).await;
                }
            }
            Err(_) => {
                let error = ElError::StartupTimeout(connection_timeout);
                error.log();
                let _ = status_tx.send(StartupStatus::ConnectionFailed(error)).await;
            }
        }

        // Release reserved ports on every exit path so failed startups don't
        // pin them
        self.connection_file.release_ports(&self.reserved_ports);
        log::trace!(
            "Released reserved ports for session {}",
            self.connection.session_id
        );
    }
}
