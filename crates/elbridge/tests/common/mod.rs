//
// mod.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! A fake Jupyter kernel for integration tests. It binds a real set of
//! ZeroMQ sockets on loopback, signs and verifies messages with a shared
//! key, and lets each test script the kernel side of the conversation.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use elbridge::connection_file::{ConnectionFile, ConnectionInfo};
use elbridge::kernel_connection::{generate_key, KernelConnection};
use elbridge::kernel_session::{await_status, KernelSession};
use elbridge::wire_message::WireMessage;
use elshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use elshared::kernel_message::KernelStatus;
use elshared::session::{InterruptMode, SessionOptions};
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;
use zeromq::{PubSocket, RepSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// A scriptable kernel. Router sockets receive the session's dealer
/// connections; the pub socket broadcasts iopub traffic; a background task
/// echoes heartbeats until paused.
pub struct FakeKernel {
    /// Connection details for reaching this kernel's sockets
    pub connection_file: ConnectionFile,

    /// The kernel-side signing connection; shares the session's key
    pub connection: KernelConnection,

    shell: RouterSocket,
    control: RouterSocket,
    stdin: RouterSocket,
    iopub: PubSocket,
    hb_task: JoinHandle<()>,
    hb_paused: Arc<AtomicBool>,

    /// Identities of the most recent shell and control requesters
    shell_identity: Option<Bytes>,
    control_identity: Option<Bytes>,

    execution_count: u64,
}

impl FakeKernel {
    /// Bind a full set of kernel sockets on loopback and start answering
    /// heartbeats.
    pub async fn start() -> Self {
        let key = generate_key();
        let ports = pick_ports(5);
        let info = ConnectionInfo {
            control_port: ports[0],
            shell_port: ports[1],
            stdin_port: ports[2],
            iopub_port: ports[3],
            hb_port: ports[4],
            transport: String::from("tcp"),
            signature_scheme: String::from("hmac-sha256"),
            ip: String::from("127.0.0.1"),
            key: key.clone(),
        };
        let connection_file = ConnectionFile { info };

        let mut shell = RouterSocket::new();
        shell
            .bind(&connection_file.endpoint(connection_file.info.shell_port))
            .await
            .expect("Failed to bind shell socket");

        let mut control = RouterSocket::new();
        control
            .bind(&connection_file.endpoint(connection_file.info.control_port))
            .await
            .expect("Failed to bind control socket");

        let mut stdin = RouterSocket::new();
        stdin
            .bind(&connection_file.endpoint(connection_file.info.stdin_port))
            .await
            .expect("Failed to bind stdin socket");

        let mut iopub = PubSocket::new();
        iopub
            .bind(&connection_file.endpoint(connection_file.info.iopub_port))
            .await
            .expect("Failed to bind iopub socket");

        let mut hb = RepSocket::new();
        hb.bind(&connection_file.endpoint(connection_file.info.hb_port))
            .await
            .expect("Failed to bind heartbeat socket");

        let hb_paused = Arc::new(AtomicBool::new(false));
        let paused = hb_paused.clone();
        let hb_task = tokio::spawn(async move {
            loop {
                let beat = match hb.recv().await {
                    Ok(msg) => msg,
                    Err(_) => break,
                };
                while paused.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                // The monitor reconnects after a missed beat, so this reply
                // may be routed to a peer that is already gone
                let _ = hb.send(beat).await;
            }
        });

        let connection = KernelConnection::new(
            format!("kernel-{}", Uuid::new_v4()),
            String::from("kernel"),
            key,
        )
        .expect("Failed to create kernel connection");

        Self {
            connection_file,
            connection,
            shell,
            control,
            stdin,
            iopub,
            hb_task,
            hb_paused,
            shell_identity: None,
            control_identity: None,
            execution_count: 0,
        }
    }

    /// Receive and decode the next shell message, remembering the requester's
    /// identity for the reply.
    pub async fn recv_shell(&mut self) -> JupyterMessage {
        let msg = self
            .shell
            .recv()
            .await
            .expect("Failed to receive on shell socket");
        self.shell_identity = Some(first_frame(&msg));
        decode(msg, JupyterChannel::Shell, &self.connection)
    }

    /// Receive and decode the next control message, remembering the
    /// requester's identity for the reply.
    pub async fn recv_control(&mut self) -> JupyterMessage {
        let msg = self
            .control
            .recv()
            .await
            .expect("Failed to receive on control socket");
        self.control_identity = Some(first_frame(&msg));
        decode(msg, JupyterChannel::Control, &self.connection)
    }

    /// Receive and decode the next stdin message.
    pub async fn recv_stdin(&mut self) -> JupyterMessage {
        let msg = self
            .stdin
            .recv()
            .await
            .expect("Failed to receive on stdin socket");
        decode(msg, JupyterChannel::Stdin, &self.connection)
    }

    /// Sign and send a reply to the most recent shell requester.
    pub async fn reply_shell(
        &mut self,
        msg_type: &str,
        parent: &JupyterMessageHeader,
        content: serde_json::Value,
    ) {
        let identity = self
            .shell_identity
            .clone()
            .expect("No shell request received yet");
        let msg = self.message(msg_type, Some(parent.clone()), JupyterChannel::Shell, content);
        let mut zmq: ZmqMessage = WireMessage::from_jupyter(msg, &self.connection)
            .expect("Failed to encode message")
            .into();
        zmq.push_front(identity);
        self.shell
            .send(zmq)
            .await
            .expect("Failed to send shell reply");
    }

    /// Sign and send a reply to the most recent control requester.
    pub async fn reply_control(
        &mut self,
        msg_type: &str,
        parent: &JupyterMessageHeader,
        content: serde_json::Value,
    ) {
        let identity = self
            .control_identity
            .clone()
            .expect("No control request received yet");
        let msg = self.message(
            msg_type,
            Some(parent.clone()),
            JupyterChannel::Control,
            content,
        );
        let mut zmq: ZmqMessage = WireMessage::from_jupyter(msg, &self.connection)
            .expect("Failed to encode message")
            .into();
        zmq.push_front(identity);
        self.control
            .send(zmq)
            .await
            .expect("Failed to send control reply");
    }

    /// Publish a signed message on iopub, prefixed with its type as the topic
    /// frame.
    pub async fn publish_iopub(
        &mut self,
        msg_type: &str,
        parent: Option<&JupyterMessageHeader>,
        content: serde_json::Value,
    ) {
        let msg = self.message(msg_type, parent.cloned(), JupyterChannel::IOPub, content);
        let mut zmq: ZmqMessage = WireMessage::from_jupyter(msg, &self.connection)
            .expect("Failed to encode message")
            .into();
        zmq.push_front(Bytes::copy_from_slice(msg_type.as_bytes()));
        self.iopub
            .send(zmq)
            .await
            .expect("Failed to publish iopub message");
    }

    /// Publish an execution state change on iopub.
    pub async fn publish_status(
        &mut self,
        execution_state: &str,
        parent: Option<&JupyterMessageHeader>,
    ) {
        self.publish_iopub(
            "status",
            parent,
            json!({ "execution_state": execution_state }),
        )
        .await;
    }

    /// Answer the kernel info request that begins every connection. Publishes
    /// the busy status and the reply, but leaves the settling idle to the
    /// caller so tests control when the session becomes ready for work.
    pub async fn handle_kernel_info(&mut self) -> JupyterMessageHeader {
        let request = self.recv_shell().await;
        assert_eq!(request.header.msg_type, "kernel_info_request");
        self.publish_status("busy", Some(&request.header)).await;
        self.reply_shell("kernel_info_reply", &request.header, kernel_info_content())
            .await;
        request.header
    }

    /// Publish the busy status and input broadcast for an execute request,
    /// leaving the execution running.
    pub async fn begin_execution(&mut self, request: &JupyterMessage) {
        self.execution_count += 1;
        let code = request.content["code"].as_str().unwrap_or("").to_string();
        self.publish_status("busy", Some(&request.header)).await;
        self.publish_iopub(
            "execute_input",
            Some(&request.header),
            json!({ "code": code, "execution_count": self.execution_count }),
        )
        .await;
    }

    /// Run the full happy-path choreography for an execute request: busy,
    /// input broadcast, stream output, ok reply, idle.
    pub async fn complete_execution(&mut self, request: &JupyterMessage, output: &str) {
        self.begin_execution(request).await;
        if !output.is_empty() {
            self.publish_iopub(
                "stream",
                Some(&request.header),
                json!({ "name": "stdout", "text": output }),
            )
            .await;
        }
        let count = self.execution_count;
        self.reply_shell(
            "execute_reply",
            &request.header,
            json!({ "status": "ok", "execution_count": count }),
        )
        .await;
        self.publish_status("idle", Some(&request.header)).await;
    }

    /// Fail a running execution: error broadcast, error reply, idle.
    pub async fn fail_execution(&mut self, request: &JupyterMessage, ename: &str, evalue: &str) {
        self.publish_iopub(
            "error",
            Some(&request.header),
            json!({
                "ename": ename,
                "evalue": evalue,
                "traceback": [format!("{}: {}", ename, evalue)],
            }),
        )
        .await;
        self.reply_shell(
            "execute_reply",
            &request.header,
            json!({ "status": "error", "ename": ename, "evalue": evalue }),
        )
        .await;
        self.publish_status("idle", Some(&request.header)).await;
    }

    /// Request input from the session. Stdin dealers identify themselves with
    /// the session ID, so the router can address them unprompted.
    pub async fn send_input_request(
        &mut self,
        session_id: &str,
        prompt: &str,
    ) -> JupyterMessageHeader {
        let msg = self.message(
            "input_request",
            None,
            JupyterChannel::Stdin,
            json!({ "prompt": prompt, "password": false }),
        );
        let header = msg.header.clone();
        let mut zmq: ZmqMessage = WireMessage::from_jupyter(msg, &self.connection)
            .expect("Failed to encode message")
            .into();
        zmq.push_front(Bytes::copy_from_slice(session_id.as_bytes()));
        self.stdin
            .send(zmq)
            .await
            .expect("Failed to send input request");
        header
    }

    /// Stop answering heartbeats until resumed.
    pub fn pause_heartbeat(&self) {
        self.hb_paused.store(true, Ordering::SeqCst);
    }

    /// Resume answering heartbeats.
    pub fn resume_heartbeat(&self) {
        self.hb_paused.store(false, Ordering::SeqCst);
    }

    fn message(
        &self,
        msg_type: &str,
        parent: Option<JupyterMessageHeader>,
        channel: JupyterChannel,
        content: serde_json::Value,
    ) -> JupyterMessage {
        JupyterMessage {
            header: JupyterMessageHeader {
                msg_id: Uuid::new_v4().to_string(),
                msg_type: msg_type.to_string(),
            },
            parent_header: parent,
            channel,
            content,
            metadata: json!({}),
            buffers: vec![],
        }
    }
}

impl Drop for FakeKernel {
    fn drop(&mut self) {
        self.hb_task.abort();
    }
}

/// A kernel info reply payload shaped like a real kernel's.
pub fn kernel_info_content() -> serde_json::Value {
    json!({
        "status": "ok",
        "protocol_version": "5.3",
        "banner": "Fake Kernel 1.0",
        "debugger": false,
        "help_links": [],
        "language_info": {
            "name": "fake",
            "version": "1.0",
            "mimetype": "text/plain",
            "file_extension": ".txt",
        },
    })
}

/// An empty reserved port list.
pub fn reserved_ports() -> Arc<std::sync::RwLock<Vec<i32>>> {
    Arc::new(std::sync::RwLock::new(Vec::new()))
}

/// Session options suitable for adopting a fake kernel.
pub fn test_options(session_id: &str) -> SessionOptions {
    let mut options = SessionOptions::new(
        session_id.to_string(),
        String::from("testuser"),
        vec![String::from("fake-kernel")],
    );
    options.interrupt_mode = InterruptMode::Message;
    options.connection_timeout = 10;
    options
}

/// Adopt a fake kernel and settle it into the idle state. Returns the kernel,
/// the connected session, and the kernel info the session captured.
pub async fn adopt_kernel(
    kernel: FakeKernel,
    options: SessionOptions,
) -> (FakeKernel, KernelSession, serde_json::Value) {
    let session = KernelSession::adopted(options, kernel.connection_file.clone(), reserved_ports())
        .expect("Failed to create session");
    let kernel_task = tokio::spawn(async move {
        let mut kernel = kernel;
        let header = kernel.handle_kernel_info().await;
        (kernel, header)
    });
    let info = session.connect().await.expect("Failed to adopt kernel");
    let (mut kernel, header) = kernel_task.await.expect("Kernel task panicked");

    // The session's subscriber loop is live once the connection completes;
    // settle the kernel into idle and wait for the session to see it
    kernel.publish_status("idle", Some(&header)).await;
    assert!(await_status(&session.state, KernelStatus::Idle, Duration::from_secs(5)).await);

    (kernel, session, info)
}

fn first_frame(msg: &ZmqMessage) -> Bytes {
    msg.get(0).expect("Message has no frames").clone()
}

fn decode(
    msg: ZmqMessage,
    channel: JupyterChannel,
    connection: &KernelConnection,
) -> JupyterMessage {
    let wire = WireMessage::from_zmq(msg).expect("Received malformed wire message");
    wire.to_jupyter(channel, connection)
        .expect("Failed to decode wire message")
}

/// Pick a set of distinct free ports.
fn pick_ports(count: usize) -> Vec<i32> {
    let mut ports: Vec<i32> = Vec::new();
    while ports.len() < count {
        let port = portpicker::pick_unused_port().expect("No free ports available") as i32;
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}
