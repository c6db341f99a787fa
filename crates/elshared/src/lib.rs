//
// lib.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Types shared between the Elara supervisor library and its clients.

pub mod jupyter_message;
pub mod kernel_info;
pub mod kernel_message;
pub mod session;
pub mod session_event;
