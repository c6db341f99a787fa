//
// wire_message_test.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//

//! Tests for wire message encoding, signing, and verification.

use bytes::Bytes;
use elbridge::error::ElError;
use elbridge::kernel_connection::{generate_key, KernelConnection};
use elbridge::wire_message::WireMessage;
use elshared::jupyter_message::{JupyterChannel, JupyterMessage, JupyterMessageHeader};
use serde_json::json;
use uuid::Uuid;
use zeromq::ZmqMessage;

/// Creates a connection with a fresh signing key.
fn test_connection() -> KernelConnection {
    KernelConnection::new(
        Uuid::new_v4().to_string(),
        String::from("testuser"),
        generate_key(),
    )
    .expect("Failed to create connection")
}

/// Creates an execute request suitable for round tripping.
fn test_message(parent: Option<JupyterMessageHeader>) -> JupyterMessage {
    JupyterMessage {
        header: JupyterMessageHeader {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: String::from("execute_request"),
        },
        parent_header: parent,
        channel: JupyterChannel::Shell,
        content: json!({
            "code": "print('hello')",
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        }),
        metadata: json!({}),
        buffers: vec![],
    }
}

#[test]
fn test_sign_and_verify_round_trip() {
    let connection = test_connection();
    let parent = JupyterMessageHeader {
        msg_id: String::from("parent-id"),
        msg_type: String::from("execute_request"),
    };
    let original = test_message(Some(parent.clone()));

    let wire = WireMessage::from_jupyter(original.clone(), &connection)
        .expect("Failed to encode message");
    let zmq: ZmqMessage = wire.into();

    let decoded = WireMessage::from_zmq(zmq)
        .expect("Failed to parse frames")
        .to_jupyter(JupyterChannel::Shell, &connection)
        .expect("Failed to verify and decode message");

    assert_eq!(decoded.header, original.header);
    assert_eq!(decoded.parent_header, Some(parent));
    assert_eq!(decoded.channel, JupyterChannel::Shell);
    assert_eq!(decoded.content, original.content);
    assert_eq!(decoded.metadata, original.metadata);
    assert!(decoded.buffers.is_empty());
}

#[test]
fn test_absent_parent_round_trips() {
    let connection = test_connection();
    let original = test_message(None);

    let zmq: ZmqMessage = WireMessage::from_jupyter(original, &connection)
        .expect("Failed to encode message")
        .into();

    let decoded = WireMessage::from_zmq(zmq)
        .expect("Failed to parse frames")
        .to_jupyter(JupyterChannel::Shell, &connection)
        .expect("Failed to verify and decode message");

    assert!(decoded.parent_header.is_none());
}

#[test]
fn test_tampered_content_rejected() {
    let connection = test_connection();
    let zmq: ZmqMessage = WireMessage::from_jupyter(test_message(None), &connection)
        .expect("Failed to encode message")
        .into();

    // Frames run delimiter, signature, header, parent, metadata, content;
    // rewrite the content frame without updating the signature
    let mut frames = zmq.into_vec();
    frames[5] = Bytes::from(json!({ "code": "os.remove('/')" }).to_string());
    let tampered = ZmqMessage::try_from(frames).expect("Failed to rebuild message");

    let err = WireMessage::from_zmq(tampered)
        .expect("Failed to parse frames")
        .to_jupyter(JupyterChannel::Shell, &connection)
        .expect_err("Tampered message should fail verification");
    assert!(matches!(err, ElError::SignatureMismatch(_)));
}

#[test]
fn test_wrong_key_rejected() {
    let sender = test_connection();
    let receiver = test_connection();

    let zmq: ZmqMessage = WireMessage::from_jupyter(test_message(None), &sender)
        .expect("Failed to encode message")
        .into();

    let err = WireMessage::from_zmq(zmq)
        .expect("Failed to parse frames")
        .to_jupyter(JupyterChannel::Shell, &receiver)
        .expect_err("Message signed with another key should fail verification");
    assert!(matches!(err, ElError::SignatureMismatch(_)));
}

#[test]
fn test_missing_delimiter_rejected() {
    let mut msg = ZmqMessage::from(b"not-a-delimiter".to_vec());
    msg.push_back(Bytes::from_static(b"payload"));

    let err = WireMessage::from_zmq(msg).expect_err("Frames without a delimiter should fail");
    assert!(matches!(err, ElError::InvalidFrame(_)));
}

#[test]
fn test_truncated_message_rejected() {
    // A delimiter followed by fewer than the five required parts
    let mut msg = ZmqMessage::from(b"<IDS|MSG>".to_vec());
    msg.push_back(Bytes::from_static(b"signature"));
    msg.push_back(Bytes::from_static(b"{}"));

    let err = WireMessage::from_zmq(msg).expect_err("Truncated message should fail");
    assert!(matches!(err, ElError::InvalidFrame(_)));
}

#[test]
fn test_routing_prefixes_stripped() {
    let connection = test_connection();
    let original = test_message(None);

    let zmq: ZmqMessage = WireMessage::from_jupyter(original.clone(), &connection)
        .expect("Failed to encode message")
        .into();

    // Simulate the frames a router or subscription socket prepends
    let mut frames = zmq.into_vec();
    frames.insert(0, Bytes::from_static(b"topic"));
    frames.insert(0, Bytes::from_static(b"router-identity"));
    let prefixed = ZmqMessage::try_from(frames).expect("Failed to rebuild message");

    let decoded = WireMessage::from_zmq(prefixed)
        .expect("Failed to parse frames")
        .to_jupyter(JupyterChannel::Shell, &connection)
        .expect("Failed to verify and decode message");

    assert_eq!(decoded.header, original.header);
    assert_eq!(decoded.content, original.content);
}
