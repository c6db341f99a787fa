//
// utils.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

//! Utility functions for kernel session management.

use std::iter;
use std::sync::Arc;

use elshared::{
    kernel_message::{KernelMessage, KernelStatus},
    session_event::SessionEvent,
};
use rand::Rng;
use tokio::{
    sync::RwLock,
    time::{timeout_at, Duration, Instant},
};

use crate::kernel_state::KernelState;

/// Generate a unique message ID for Jupyter messages.
///
/// # Returns
///
/// A random hexadecimal string of 10 characters.
pub fn make_message_id() -> String {
    let mut rng = rand::thread_rng();
    iter::repeat_with(|| format!("{:x}", rng.gen_range(0..16)))
        .take(10)
        .collect()
}

/// Wait up to `wait` for the session to reach the wanted status.
///
/// Returns true once the status is reached; returns false if the kernel
/// exits first, the wait elapses, or the event stream closes. The
/// subscription taken for the wait is dropped on return either way.
pub async fn await_status(
    state: &Arc<RwLock<KernelState>>,
    wanted: KernelStatus,
    wait: Duration,
) -> bool {
    // Subscribe and sample under one lock so a transition between the two
    // cannot be missed
    let (events, status) = {
        let mut state = state.write().await;
        (state.subscribe(), state.status)
    };
    if status == wanted {
        return true;
    }
    if status == KernelStatus::Exited {
        return false;
    }

    let deadline = Instant::now() + wait;
    loop {
        match timeout_at(deadline, events.recv()).await {
            Ok(Ok(SessionEvent::Kernel(KernelMessage::Status(update)))) => {
                if update.status == wanted {
                    return true;
                }
                if update.status == KernelStatus::Exited {
                    return false;
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return false,
            Err(_) => return false,
        }
    }
}
