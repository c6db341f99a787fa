//
// kernel_connection.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

/// The signing identity of a session: who sends messages, and with what key.
/// Immutable once created; a new session gets a new connection.
#[derive(Debug, Clone)]
pub struct KernelConnection {
    /// The ID of the session
    pub session_id: String,

    /// The username of the user who owns the session
    pub username: String,

    /// The signing key, as a hex string
    pub key: String,

    /// The Jupyter protocol version
    pub protocol_version: String,

    /// The HMAC key used to sign messages
    pub hmac_key: Hmac<Sha256>,
}

impl KernelConnection {
    pub fn new(session_id: String, username: String, key: String) -> Result<Self, anyhow::Error> {
        let hmac_key = Hmac::<Sha256>::new_from_slice(key.as_bytes())?;

        Ok(Self {
            session_id,
            username,
            key,
            protocol_version: String::from("5.3"),
            hmac_key,
        })
    }
}

/// Generate a fresh 16-byte signing secret, hex-encoded.
pub fn generate_key() -> String {
    let key_bytes = rand::thread_rng().gen::<[u8; 16]>();
    hex::encode(key_bytes)
}
