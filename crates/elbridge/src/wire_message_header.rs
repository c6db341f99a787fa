//
// wire_message_header.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use elshared::jupyter_message::JupyterMessageHeader;
use serde::{Deserialize, Serialize};

use crate::kernel_connection::KernelConnection;

/// The full header of a message as it appears on the wire. The session ID,
/// username, timestamp, and protocol version are filled in from the
/// connection; clients only supply the message ID and type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessageHeader {
    /// The message ID
    pub msg_id: String,

    /// The type of the message
    pub msg_type: String,

    /// The ID of the session
    pub session: String,

    /// The username of the session's owner
    pub username: String,

    /// The date/time the message was published, as an ISO 8601 string
    pub date: String,

    /// The version of the Jupyter protocol
    pub version: String,
}

impl WireMessageHeader {
    /// Create a new wire message header from a Jupyter message header.
    pub fn new(header: JupyterMessageHeader, connection: &KernelConnection) -> Self {
        let date = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        WireMessageHeader {
            msg_id: header.msg_id,
            msg_type: header.msg_type,
            session: connection.session_id.clone(),
            username: connection.username.clone(),
            date,
            version: connection.protocol_version.clone(),
        }
    }

    /// Reduce this header to the partial form used inside the process.
    pub fn to_jupyter(&self) -> JupyterMessageHeader {
        JupyterMessageHeader {
            msg_id: self.msg_id.clone(),
            msg_type: self.msg_type.clone(),
        }
    }
}
