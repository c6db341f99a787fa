//
// connection_file.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ElError;

/// The fields of the connection file as listed in the Jupyter specification;
/// directly parsed from JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionInfo {
    /// The port for control channel messages
    pub control_port: i32,

    /// The port for shell channel messages
    pub shell_port: i32,

    /// The port for stdin channel messages
    pub stdin_port: i32,

    /// The port for iopub channel messages
    pub iopub_port: i32,

    /// The port for heartbeat messages
    pub hb_port: i32,

    /// The transport protocol; always "tcp"
    pub transport: String,

    /// The signature scheme; always "hmac-sha256"
    pub signature_scheme: String,

    /// The IP address to bind to
    pub ip: String,

    /// The hex-encoded signing key
    pub key: String,
}

/// The contents of a Jupyter connection file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionFile {
    pub info: ConnectionInfo,
}

impl ConnectionFile {
    /// Create a ConnectionFile by parsing the contents of a connection file.
    pub fn from_file<P: AsRef<Path>>(connection_file: P) -> Result<Self, ElError> {
        let file = File::open(&connection_file)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;
        let reader = BufReader::new(file);
        let info = serde_json::from_reader(reader)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;

        Ok(Self { info })
    }

    /// Write the connection file to disk. The file carries the signing secret,
    /// so on Unix it is created readable by the owner only.
    pub fn to_file<P: AsRef<Path>>(&self, connection_file: P) -> Result<(), ElError> {
        let file = File::create(&connection_file)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;
        }

        serde_json::to_writer_pretty(file, &self.info)
            .map_err(|e| ElError::SessionStorageFailed(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find a free port that is not in the reserved list.
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the port to find. This is used for logging.
    /// * `reserved_ports` - A list of ports that should not be used.
    fn find_port(name: String, reserved_ports: Arc<RwLock<Vec<i32>>>) -> Result<u16, ElError> {
        // The current candidate port; 0 indicates we haven't found one yet
        let mut port = 0;

        // The number of times we've tried to find an unused, unreserved port
        let mut tries = 0;

        while port == 0 {
            // Find a free port
            let candidate = match portpicker::pick_unused_port() {
                Some(port) => port,
                None => {
                    return Err(ElError::PortExhausted(name));
                }
            };

            // Check if the port is reserved
            {
                let reserved_ports = reserved_ports.read().unwrap();
                if reserved_ports.contains(&candidate.into()) {
                    // Try up to 10 times to find an unreserved port. Since
                    // we're picking from a large range of ports, hitting a
                    // previously reserved port is unlikely, but possible. If it
                    // happens 10 times in a row, something is probably wrong.
                    tries += 1;
                    if tries > 10 {
                        return Err(ElError::PortExhausted(name));
                    }
                    log::trace!(
                        "Port {} is reserved; trying again (attempt {})",
                        candidate,
                        tries
                    );
                    continue;
                }
            }

            // Reserve the port
            {
                let mut reserved_ports = reserved_ports.write().unwrap();
                reserved_ports.push(candidate.into());
                log::trace!(
                    "Picked {} port: {} ({} ports reserved)",
                    name,
                    candidate,
                    reserved_ports.len()
                );
            }

            port = candidate;
            break;
        }

        Ok(port)
    }

    /// Generate a new ConnectionFile by picking free ports.
    ///
    /// # Arguments
    ///
    /// * `ip` - The IP address to bind to
    /// * `reserved_ports` - A list of ports that should not be used. These are
    ///   generally ports that are already in use by other running kernels, or
    ///   have been reserved for use by another kernel that's also starting up.
    /// * `key` - The session's signing key
    pub fn generate(
        ip: String,
        reserved_ports: Arc<RwLock<Vec<i32>>>,
        key: String,
    ) -> Result<Self, ElError> {
        let control_port =
            ConnectionFile::find_port(String::from("control"), reserved_ports.clone())?;
        let shell_port = ConnectionFile::find_port(String::from("shell"), reserved_ports.clone())?;
        let iopub_port = ConnectionFile::find_port(String::from("iopub"), reserved_ports.clone())?;
        let hb_port = ConnectionFile::find_port(String::from("heartbeat"), reserved_ports.clone())?;
        let stdin_port = ConnectionFile::find_port(String::from("stdin"), reserved_ports.clone())?;
        let info = ConnectionInfo {
            control_port: control_port.into(),
            shell_port: shell_port.into(),
            stdin_port: stdin_port.into(),
            iopub_port: iopub_port.into(),
            hb_port: hb_port.into(),
            transport: "tcp".to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            key,
            ip,
        };
        Ok(Self { info })
    }

    /// Remove this connection file's ports from the reserved set, making them
    /// available to future sessions.
    pub fn release_ports(&self, reserved_ports: &Arc<RwLock<Vec<i32>>>) {
        let mut reserved_ports = reserved_ports.write().unwrap();
        reserved_ports.retain(|&port| {
            port != self.info.control_port
                && port != self.info.shell_port
                && port != self.info.stdin_port
                && port != self.info.iopub_port
                && port != self.info.hb_port
        });
        log::trace!(
            "Released connection ports; there are now {} reserved ports",
            reserved_ports.len()
        );
    }

    /// Given a port, return a URI-like string that can be used to connect to
    /// the port, given the other parameters in the connection file.
    ///
    /// Example: `32` => `"tcp://127.0.0.1:32"`
    pub fn endpoint(&self, port: i32) -> String {
        format!("{}://{}:{}", self.info.transport, self.info.ip, port)
    }
}
