//
// startup_status.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use crate::error::ElError;

/// The status of the kernel startup.
pub enum StartupStatus {
    /// The kernel process exited before its sockets connected; carries the
    /// exit code
    AbnormalExit(i32, ElError),

    /// The kernel's sockets could not be connected within the startup window
    ConnectionFailed(ElError),

    /// The kernel connected and replied to a kernel info request; carries the
    /// kernel info as a JSON object
    Connected(serde_json::Value),
}
