//
// wire_message.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use elshared::jupyter_message::{JupyterChannel, JupyterMessage};
use hmac::Mac;
use zeromq::ZmqMessage;

use crate::{
    error::ElError, kernel_connection::KernelConnection, wire_message_header::WireMessageHeader,
};

/// The frame that separates ZeroMQ routing prefixes from message payloads.
pub const WIRE_DELIMITER: &[u8] = b"<IDS|MSG>";

/// A Jupyter message in its on-the-wire form.
pub struct WireMessage {
    /// The parts of the message, as an array of byte arrays: the signature,
    /// the header, the parent header, the metadata, the content, and then any
    /// buffers. The delimiter frame and any routing frames before it are not
    /// included.
    pub parts: Vec<Vec<u8>>,
}

impl WireMessage {
    /// Create a wire message from a Jupyter message, signing it with the
    /// connection's key.
    pub fn from_jupyter(
        msg: JupyterMessage,
        connection: &KernelConnection,
    ) -> Result<Self, ElError> {
        let mut parts: Vec<Vec<u8>> = Vec::new();

        // Derive a full wire header from the partial Jupyter message header
        let header = WireMessageHeader::new(msg.header, connection);
        parts.push(Self::to_json_bytes(&header, "header")?);

        // Add the parent header; an absent parent serializes as an empty
        // object, never null, so the signing input is unambiguous
        match msg.parent_header {
            Some(parent) => {
                let parent = WireMessageHeader::new(parent, connection);
                parts.push(Self::to_json_bytes(&parent, "parent header")?);
            }
            None => {
                parts.push(Self::to_json_bytes(&serde_json::Map::new(), "parent header")?);
            }
        }

        // Add the metadata and the content
        parts.push(Self::to_json_bytes(&msg.metadata, "metadata")?);
        parts.push(Self::to_json_bytes(&msg.content, "content")?);

        // Compute the HMAC signature from all of the existing parts and
        // prepend it
        let mut signature = connection.hmac_key.clone();
        for part in &parts {
            signature.update(part);
        }
        let signature = hex::encode(signature.finalize().into_bytes());
        parts.insert(0, signature.as_bytes().to_vec());

        // Buffers ride after the content and are not part of the signature
        for buffer in msg.buffers {
            parts.push(Self::to_json_bytes(&buffer, "buffer")?);
        }

        Ok(WireMessage { parts })
    }

    /// Create a wire message from the raw frames of a ZeroMQ message.
    ///
    /// Frames before the `<IDS|MSG>` delimiter are routing or topic prefixes
    /// and are discarded; the frames after it are kept verbatim.
    pub fn from_zmq(message: ZmqMessage) -> Result<Self, ElError> {
        let frames = message.into_vec();
        let delimiter = frames
            .iter()
            .position(|frame| frame.as_ref() == WIRE_DELIMITER);
        let delimiter = match delimiter {
            Some(idx) => idx,
            None => {
                return Err(ElError::InvalidFrame(String::from(
                    "no <IDS|MSG> delimiter frame",
                )))
            }
        };

        let parts: Vec<Vec<u8>> = frames[delimiter + 1..]
            .iter()
            .map(|frame| frame.to_vec())
            .collect();

        // A signed message has at least a signature and four payload parts
        if parts.len() < 5 {
            return Err(ElError::InvalidFrame(format!(
                "expected at least 5 frames after delimiter, got {}",
                parts.len()
            )));
        }

        Ok(WireMessage { parts })
    }

    /// Verify this message's signature and decode it into a Jupyter message.
    ///
    /// The signature is checked before any payload part is parsed, so a
    /// forged message is rejected without its content ever being interpreted.
    pub fn to_jupyter(
        &self,
        channel: JupyterChannel,
        connection: &KernelConnection,
    ) -> Result<JupyterMessage, ElError> {
        // The signature is ASCII hex on the wire
        let signature = match hex::decode(&self.parts[0]) {
            Ok(sig) => sig,
            Err(_) => return Err(ElError::SignatureMismatch(Self::channel_name(channel))),
        };

        let mut mac = connection.hmac_key.clone();
        for part in &self.parts[1..5] {
            mac.update(part);
        }

        // verify_slice compares in constant time
        if mac.verify_slice(&signature).is_err() {
            return Err(ElError::SignatureMismatch(Self::channel_name(channel)));
        }

        let header: WireMessageHeader = serde_json::from_slice(&self.parts[1])
            .map_err(|e| ElError::MalformedPayload(String::from("header"), e))?;

        // An empty object means the message has no parent
        let parent: serde_json::Value = serde_json::from_slice(&self.parts[2])
            .map_err(|e| ElError::MalformedPayload(String::from("parent header"), e))?;
        let parent_header = if parent.as_object().is_some_and(|obj| obj.is_empty()) {
            None
        } else {
            let parent: WireMessageHeader = serde_json::from_value(parent)
                .map_err(|e| ElError::MalformedPayload(String::from("parent header"), e))?;
            Some(parent.to_jupyter())
        };

        let metadata: serde_json::Value = serde_json::from_slice(&self.parts[3])
            .map_err(|e| ElError::MalformedPayload(String::from("metadata"), e))?;

        let content: serde_json::Value = serde_json::from_slice(&self.parts[4])
            .map_err(|e| ElError::MalformedPayload(String::from("content"), e))?;

        // Buffers are passed through on a best-effort basis
        let buffers = self.parts[5..]
            .iter()
            .filter_map(|part| serde_json::from_slice(part).ok())
            .collect();

        Ok(JupyterMessage {
            header: header.to_jupyter(),
            parent_header,
            channel,
            content,
            metadata,
            buffers,
        })
    }

    fn to_json_bytes<T: serde::Serialize>(value: &T, part: &str) -> Result<Vec<u8>, ElError> {
        serde_json::to_vec(value)
            .map_err(|e| ElError::MalformedPayload(String::from(part), e))
    }

    fn channel_name(channel: JupyterChannel) -> String {
        format!("{:?}", channel).to_lowercase()
    }
}

impl From<WireMessage> for ZmqMessage {
    fn from(msg: WireMessage) -> Self {
        let mut zmq_message = ZmqMessage::from(WIRE_DELIMITER.to_vec());
        for part in msg.parts {
            zmq_message.push_back(part.into());
        }
        zmq_message
    }
}
