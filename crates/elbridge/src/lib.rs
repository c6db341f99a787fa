//
// lib.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Elara's session supervisor: starts, adopts, and supervises Jupyter
//! kernels, bridging their ZeroMQ sockets to an in-process API.

/// Connection file creation and port reservation
pub mod connection_file;

/// Error types and codes
pub mod error;

/// Execution queueing and result routing
pub mod execution_tracker;

/// Kernel heartbeat monitoring
pub mod heartbeat;

/// Typed payloads of the Jupyter messages the supervisor interprets
pub mod jupyter_messages;

/// Session identity and message signing
pub mod kernel_connection;

/// Kernel session management
pub mod kernel_session;

/// Mutable session state and event publication
pub mod kernel_state;

/// Language server activation tied to the kernel lifecycle
pub mod lsp_activator;

/// Startup outcome reporting
pub mod startup_status;

/// Jupyter wire protocol framing and signing
pub mod wire_message;

/// Wire message headers
pub mod wire_message_header;

/// The ZeroMQ socket proxy
pub mod zmq_proxy;
