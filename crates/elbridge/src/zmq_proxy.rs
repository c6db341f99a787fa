//
// zmq_proxy.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::{str::FromStr, sync::Arc};

use async_channel::Receiver;
use elshared::{
    jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader},
    kernel_message::KernelStatus,
    session_event::SessionEvent,
};
use event_listener::Event;
use tokio::{select, sync::RwLock};
use zeromq::{
    util::PeerIdentity, DealerSocket, Socket, SocketOptions, SocketRecv, SocketSend, SubSocket,
    ZmqMessage,
};

use crate::{
    connection_file::ConnectionFile,
    execution_tracker::ExecutionMode,
    heartbeat::HeartbeatMonitor,
    jupyter_messages::{ExecutionState, JupyterMsg},
    kernel_connection::KernelConnection,
    kernel_session::make_message_id,
    kernel_state::KernelState,
    wire_message::WireMessage,
};

pub struct ZmqProxy {
    pub shell_socket: Option<DealerSocket>,
    pub iopub_socket: Option<SubSocket>,
    pub control_socket: Option<DealerSocket>,
    pub stdin_socket: Option<DealerSocket>,
    pub connection_file: ConnectionFile,
    pub connection: KernelConnection,
    pub heartbeat: HeartbeatMonitor,
    pub session_id: String,
    pub closed: bool,
    pub outbound_rx: Receiver<JupyterMessage>,
    pub exit_event: Arc<Event>,
    pub state: Arc<RwLock<KernelState>>,
}

impl ZmqProxy {
    /// Create a proxy for a kernel's ZeroMQ connection.
    ///
    /// This forms the socket side of a session: it receives messages from the
    /// kernel's sockets, routes them through the execution tracker and the
    /// state machine, and publishes them to session subscribers. It also
    /// listens for outbound messages from the session and delivers them to
    /// the right socket.
    ///
    /// - `connection_file`: The connection file for the kernel (names the
    ///    sockets and ports)
    /// - `connection`: The signing identity for the kernel
    /// - `state`: The current state of the kernel
    /// - `outbound_rx`: A channel yielding messages to send to the kernel
    /// - `exit_event`: Fires when the kernel process exits
    pub fn new(
        connection_file: ConnectionFile,
        connection: KernelConnection,
        state: Arc<RwLock<KernelState>>,
        outbound_rx: Receiver<JupyterMessage>,
        exit_event: Arc<Event>,
    ) -> Self {
        let session_id = connection.session_id.clone();
        let hb_address = connection_file.endpoint(connection_file.info.hb_port);

        Self {
            shell_socket: Some(DealerSocket::with_options(ZmqProxy::dealer_peer_opts(
                session_id.clone(),
            ))),
            iopub_socket: Some(SubSocket::new()),
            control_socket: Some(DealerSocket::with_options(ZmqProxy::dealer_peer_opts(
                session_id.clone(),
            ))),
            stdin_socket: Some(DealerSocket::with_options(ZmqProxy::dealer_peer_opts(
                session_id.clone(),
            ))),
            heartbeat: HeartbeatMonitor::new(
                state.clone(),
                session_id.clone(),
                hb_address,
                exit_event.clone(),
            ),
            connection_file,
            connection,
            outbound_rx,
            exit_event,
            state,
            session_id: session_id.clone(),
            closed: false,
        }
    }

    /// Creates the socket options for DEALER sockets to set the peer identity
    /// to the session ID.
    fn dealer_peer_opts(session_id: String) -> SocketOptions {
        let mut peer_opts = SocketOptions::default();
        let peer_id = PeerIdentity::from_str(session_id.as_str()).unwrap();
        peer_opts.peer_identity(peer_id);
        peer_opts
    }

    pub async fn connect(&mut self) -> Result<(), anyhow::Error> {
        // Ensure we're not closed before connecting; this makes it safe to
        // unwrap the sockets below.
        if self.closed {
            anyhow::bail!("Cannot connect; proxy is closed.");
        }

        self.shell_socket
            .as_mut()
            .unwrap()
            .connect(
                self.connection_file
                    .endpoint(self.connection_file.info.shell_port)
                    .as_str(),
            )
            .await?;

        log::trace!(
            "[session {}] Connected to shell socket on port {}",
            self.connection.session_id,
            self.connection_file.info.shell_port
        );

        self.iopub_socket
            .as_mut()
            .unwrap()
            .connect(
                self.connection_file
                    .endpoint(self.connection_file.info.iopub_port)
                    .as_str(),
            )
            .await?;
        log::trace!(
            "[session {}] Connected to iopub socket on port {}",
            self.connection.session_id,
            self.connection_file.info.iopub_port
        );

        // Subscribe to all messages
        self.iopub_socket.as_mut().unwrap().subscribe("").await?;

        self.control_socket
            .as_mut()
            .unwrap()
            .connect(
                self.connection_file
                    .endpoint(self.connection_file.info.control_port)
                    .as_str(),
            )
            .await?;
        log::trace!(
            "[session {}] Connected to control socket on port {}",
            self.connection.session_id,
            self.connection_file.info.control_port
        );

        self.stdin_socket
            .as_mut()
            .unwrap()
            .connect(
                self.connection_file
                    .endpoint(self.connection_file.info.stdin_port)
                    .as_str(),
            )
            .await?;
        log::trace!(
            "[session {}] Connected to stdin socket on port {}",
            self.connection.session_id,
            self.connection_file.info.stdin_port
        );

        // Sockets are connected; start the heartbeat monitor
        self.heartbeat.monitor();

        Ok(())
    }

    /// Gets the kernel info by sending a kernel_info_request message to the
    /// kernel and waiting for the reply. Returns the kernel info as a JSON
    /// object.
    ///
    /// This doubles as the readiness probe: a kernel that answers it has its
    /// shell channel up and running.
    pub async fn get_kernel_info(&mut self) -> Result<serde_json::Value, anyhow::Error> {
        // Create a random message ID for the kernel info request
        let msg_id = make_message_id();

        // Form the kernel_info_request message
        let request = JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: msg_id.clone(),
                msg_type: "kernel_info_request".to_string(),
            },
            parent_header: None,
            channel: JupyterChannel::Shell,
            content: serde_json::json!({}),
            metadata: serde_json::json!({}),
            buffers: vec![],
        };

        // Translate it into a wire message and send it to the shell socket
        let wire_message = WireMessage::from_jupyter(request, &self.connection)?;
        let zmq_message: ZmqMessage = wire_message.into();
        self.shell_socket
            .as_mut()
            .unwrap()
            .send(zmq_message)
            .await?;

        // Wait for the reply
        let reply = self.wait_for_shell_reply(msg_id.clone()).await?;

        Ok(reply.content)
    }

    async fn wait_for_shell_reply(
        &mut self,
        msg_id: String,
    ) -> Result<JupyterMessage, anyhow::Error> {
        let session_id = self.connection.session_id.clone();
        loop {
            select! {
                shell_msg = self.shell_socket.as_mut().unwrap().recv() => {
                    match shell_msg {
                        Ok(msg) => {
                            let wire_message = WireMessage::from_zmq(msg)?;
                            let jupyter_message = wire_message.to_jupyter(JupyterChannel::Shell, &self.connection)?;
                            let parent = match jupyter_message.parent_header {
                                None => {
                                    log::warn!("[session {}] Discarding message with no parent header: {}", session_id, jupyter_message.header.msg_id);
                                    continue;
                                },
                                Some(ref parent_header) => parent_header,
                            };
                            if parent.msg_id == msg_id {
                                return Ok(jupyter_message);
                            } else {
                                log::warn!("[session {}] Discarding message with unexpected parent msg_id: {}", session_id, jupyter_message.header.msg_id);
                            }
                        },
                        Err(e) => {
                            return Err(anyhow::anyhow!("Failed to receive message from shell socket: {}", e));
                        },
                    }
                },
                iopub_msg = self.iopub_socket.as_mut().unwrap().recv() => {
                    match iopub_msg {
                        Ok(msg) => {
                            log::trace!("[session {}] Ignoring iopub message {:?}", session_id, msg);
                        },
                        Err(e) => {
                            return Err(anyhow::anyhow!("Failed to receive message from iopub socket: {}", e));
                        },
                    }
                },
            }
        }
    }

    pub async fn listen(&mut self) -> Result<(), anyhow::Error> {
        let session_id = self.connection.session_id.clone();
        log::debug!(
            "[session {}] Starting ZeroMQ proxy",
            self.connection.session_id
        );
        // Wait for a message from any socket
        loop {
            let exit_listener = self.exit_event.listen();

            // The exit event may fire while a message is being handled, when
            // no listener is registered; the status is already Exited by then,
            // so check it after registering
            if self.state.read().await.status == KernelStatus::Exited {
                log::debug!(
                    "[session {}] Stopping ZeroMQ proxy (kernel exited)",
                    session_id
                );
                break;
            }

            select! {
                shell_msg = self.shell_socket.as_mut().unwrap().recv() => {
                    match shell_msg {
                        Ok(msg) => {
                            self.forward_zmq(JupyterChannel::Shell, msg).await?;
                        },
                        Err(e) => {
                            log::error!("[session {}] Failed to receive message from shell socket: {}", session_id, e);
                            break;
                        },
                    }
                },
                iopub_msg = self.iopub_socket.as_mut().unwrap().recv() => {
                    match iopub_msg {
                        Ok(msg) => {
                            self.forward_zmq(JupyterChannel::IOPub, msg).await?;
                        },
                        Err(e) => {
                            log::error!("[session {}] Failed to receive message from iopub socket: {}", session_id, e);
                            break;
                        },
                    }
                },
                control_msg = self.control_socket.as_mut().unwrap().recv() => {
                    match control_msg {
                        Ok(msg) => {
                            self.forward_zmq(JupyterChannel::Control, msg).await?;
                        },
                        Err(e) => {
                            log::error!("[session {}] Failed to receive message from control socket: {}", session_id, e);
                            break;
                        },
                    }
                },
                stdin_msg = self.stdin_socket.as_mut().unwrap().recv() => {
                    match stdin_msg {
                        Ok(msg) => {
                            self.forward_zmq(JupyterChannel::Stdin, msg).await?;
                        },
                        Err(e) => {
                            log::error!("[session {}] Failed to receive message from stdin socket: {}", session_id, e);
                            break;
                        },
                    }
                },
                outbound_msg = self.outbound_rx.recv() => {
                    match outbound_msg {
                        Ok(msg) => {
                            self.forward_outbound(msg).await?;
                        }
                        Err(e) => {
                            log::error!("[session {}] Failed to receive outbound message: {}", session_id, e);
                            break;
                        },
                    }
                },
                _ = exit_listener => {
                    log::debug!("[session {}] Stopping ZeroMQ proxy (exit event signaled)", session_id);
                    break;
                },
            };
        }
        log::debug!(
            "[session {}] Ending ZeroMQ proxy",
            self.connection.session_id
        );

        // Close the sockets. This consumes the socket, so we need to take() it.
        self.closed = true;
        self.shell_socket.take().unwrap().close().await;
        self.iopub_socket.take().unwrap().close().await;
        self.control_socket.take().unwrap().close().await;
        self.stdin_socket.take().unwrap().close().await;

        Ok(())
    }

    /// Deliver an outbound Jupyter message to the socket its channel names.
    async fn forward_outbound(&mut self, msg: JupyterMessage) -> Result<(), anyhow::Error> {
        // Ensure we're not closed before forwarding the message; this makes it
        // safe to unwrap the sockets below.
        if self.closed {
            anyhow::bail!("Cannot forward outbound message; proxy is closed.");
        }

        // Convert the message to a wire message
        let channel = msg.channel;
        let wire_message = WireMessage::from_jupyter(msg, &self.connection)?;
        let zmq_message: ZmqMessage = wire_message.into();
        match channel {
            JupyterChannel::Shell => {
                log::trace!("Sending message to shell socket");
                self.shell_socket
                    .as_mut()
                    .unwrap()
                    .send(zmq_message)
                    .await?;
                log::trace!("Sent message to shell socket");
            }
            JupyterChannel::Control => {
                log::trace!("Sending message to control socket");
                self.control_socket
                    .as_mut()
                    .unwrap()
                    .send(zmq_message)
                    .await?;
                log::trace!("Sent message to control socket");
            }
            JupyterChannel::Stdin => {
                log::trace!("Sending message to stdin socket");
                self.stdin_socket
                    .as_mut()
                    .unwrap()
                    .send(zmq_message)
                    .await?;
                log::trace!("Sent message to stdin socket");
            }
            _ => {
                log::error!("Unsupported outbound channel: {:?}", channel);
            }
        }
        Ok(())
    }

    /// Route a message arriving from a kernel socket through the tracker and
    /// the state machine, then publish it to session subscribers.
    ///
    /// - `channel`: The channel the message arrived on
    /// - `message`: The raw message
    async fn forward_zmq(
        &mut self,
        channel: JupyterChannel,
        message: ZmqMessage,
    ) -> Result<(), anyhow::Error> {
        // Ensure we're not closed before forwarding the message; this makes it
        // safe to unwrap the sockets below.
        if self.closed {
            anyhow::bail!("Cannot forward ZMQ message; proxy is closed.");
        }

        // (1) convert the raw parts/frames of the message into a `WireMessage`.
        // A message that isn't framed as a Jupyter message is dropped here.
        let message = match WireMessage::from_zmq(message) {
            Ok(message) => message,
            Err(e) => {
                e.log();
                return Ok(());
            }
        };

        // (2) verify the signature and convert it into a Jupyter message. A
        // message that fails verification or parsing is dropped, not
        // forwarded.
        let message = match message.to_jupyter(channel, &self.connection) {
            Ok(message) => message,
            Err(e) => {
                e.log();
                return Ok(());
            }
        };

        let parent_id = message.parent_header.as_ref().map(|h| h.msg_id.clone());
        let jupyter = JupyterMsg::from(&message);

        // Output from a silent execution accumulates in its result but is not
        // broadcast to subscribers.
        let mut publish = true;

        match jupyter {
            JupyterMsg::Status(status) => {
                // Write the new execution state to the kernel state
                {
                    let mut state = self.state.write().await;
                    state.handle_execution_state(status.execution_state);
                }
                // An idle status resolves the execution named by its parent
                // header; resolving can free the slot for a queued request
                if status.execution_state == ExecutionState::Idle {
                    if let Some(ref parent_id) = parent_id {
                        let mut state = self.state.write().await;
                        if let Some(next) = state.executions.resolve_idle(parent_id) {
                            let wire = WireMessage::from_jupyter(next, &self.connection)?;
                            self.shell_socket.as_mut().unwrap().send(wire.into()).await?;
                            state.set_status(
                                KernelStatus::Busy,
                                Some(String::from("queued execution dispatched")),
                            );
                        }
                    }
                }
            }
            JupyterMsg::ExecuteInput(input) => {
                if let Some(ref parent_id) = parent_id {
                    let mut state = self.state.write().await;
                    publish = !Self::suppress_broadcast(&state, parent_id);
                    state.executions.record_input(parent_id, input);
                }
            }
            JupyterMsg::Stream(stream) => {
                if let Some(ref parent_id) = parent_id {
                    let mut state = self.state.write().await;
                    publish = !Self::suppress_broadcast(&state, parent_id);
                    state.executions.record_stream(parent_id, stream);
                }
            }
            JupyterMsg::DisplayData | JupyterMsg::ExecuteResult => {
                if let Some(ref parent_id) = parent_id {
                    let mut state = self.state.write().await;
                    publish = !Self::suppress_broadcast(&state, parent_id);
                    state.executions.record_data(parent_id, message.content.clone());
                }
            }
            JupyterMsg::Error(_) => {
                if let Some(ref parent_id) = parent_id {
                    let mut state = self.state.write().await;
                    publish = !Self::suppress_broadcast(&state, parent_id);
                    // A stop-on-error execution resolves on the spot; if that
                    // frees the slot, deliver the next queued request
                    if let Some(next) = state
                        .executions
                        .record_error(parent_id, message.content.clone())
                    {
                        let wire = WireMessage::from_jupyter(next, &self.connection)?;
                        self.shell_socket.as_mut().unwrap().send(wire.into()).await?;
                    }
                }
            }
            _ => {
                // Do nothing for other message types (let the message pass through)
            }
        }

        // (3) wrap the Jupyter message in a `SessionEvent::Jupyter` and
        // publish it to subscribers.
        if publish {
            let mut state = self.state.write().await;
            state.publish(SessionEvent::Jupyter(message));
        }
        Ok(())
    }

    /// Whether traffic parented to this execution is withheld from
    /// subscribers. Silent executions report only through their result.
    fn suppress_broadcast(state: &KernelState, parent_id: &str) -> bool {
        matches!(
            state.executions.mode(parent_id),
            Some(ExecutionMode::Silent)
        )
    }
}
