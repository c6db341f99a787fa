//
// execution_tracker.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use std::collections::{HashMap, VecDeque};

use async_channel::{Receiver, Sender};
use elshared::{jupyter_message::JupyterMessage, kernel_message::OutputStream};
use serde::{Deserialize, Serialize};

use crate::{
    error::ElError,
    jupyter_messages::{JupyterExecuteInput, JupyterStream},
};

/// How an execution participates in the session's queue and history.
///
/// Modes affect policy, not routing: replies are correlated by parent ID the
/// same way regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Queued behind any currently running interactive execution; stored in
    /// the kernel's history
    Interactive,

    /// Runs immediately, even while an interactive execution is active; its
    /// output is not surfaced to the user
    Silent,

    /// Runs immediately; output is surfaced but not stored in history
    Transient,
}

/// A single piece of output accumulated for an execution.
#[derive(Debug, Clone)]
pub enum ExecutionOutput {
    /// The code echoed back by the kernel (`execute_input`)
    Input(String),

    /// Text written to stdout or stderr (`stream`)
    Stream(OutputStream, String),

    /// A MIME-keyed data bundle (`display_data` or `execute_result`)
    Data(serde_json::Value),
}

/// The resolved outcome of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The execution ID this result belongs to
    pub execution_id: String,

    /// Everything the kernel emitted for this execution, in arrival order
    pub outputs: Vec<ExecutionOutput>,

    /// The error payload, if the kernel reported one
    pub error: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// Whether the execution completed without a kernel-reported error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// The concatenated stream output of the execution.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for output in &self.outputs {
            if let ExecutionOutput::Stream(_, chunk) = output {
                text.push_str(chunk);
            }
        }
        text
    }
}

/// A channel that yields exactly one execution outcome.
pub type ExecutionReceiver = Receiver<Result<ExecutionResult, ElError>>;

/// An execution that has been submitted but not yet resolved.
#[derive(Debug)]
struct PendingExecution {
    mode: ExecutionMode,

    /// Whether an error message should resolve this execution immediately,
    /// without waiting for the idle status
    stop_on_error: bool,

    outputs: Vec<ExecutionOutput>,

    error: Option<serde_json::Value>,

    result_tx: Sender<Result<ExecutionResult, ElError>>,
}

/// Routes asynchronous kernel replies to the executions that caused them, and
/// resolves each execution's outcome exactly once.
#[derive(Debug)]
pub struct ExecutionTracker {
    /// The session ID for this tracker instance, used in log output.
    session_id: String,

    /// All unresolved executions, keyed by execution ID
    pending: HashMap<String, PendingExecution>,

    /// The interactive execution currently running on the kernel, if any
    active_interactive: Option<String>,

    /// Interactive requests waiting for the active one to finish
    queued: VecDeque<JupyterMessage>,
}

impl ExecutionTracker {
    /// Create a new execution tracker.
    pub fn new(session_id: String) -> Self {
        ExecutionTracker {
            session_id,
            pending: HashMap::new(),
            active_interactive: None,
            queued: VecDeque::new(),
        }
    }

    /// The number of unresolved executions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a new execution and decide whether its request can be
    /// delivered to the kernel right away.
    ///
    /// Returns a receiver that yields the execution's outcome, plus the
    /// request itself if it should be sent now. Interactive requests are held
    /// back while another interactive execution is running; silent and
    /// transient requests always go straight through.
    pub fn submit(
        &mut self,
        request: JupyterMessage,
        mode: ExecutionMode,
        stop_on_error: bool,
    ) -> Result<(ExecutionReceiver, Option<JupyterMessage>), ElError> {
        let execution_id = request.header.msg_id.clone();
        if self.pending.contains_key(&execution_id) {
            return Err(ElError::DuplicateExecutionId(execution_id));
        }

        let (result_tx, result_rx) = async_channel::bounded(1);
        self.pending.insert(
            execution_id.clone(),
            PendingExecution {
                mode,
                stop_on_error,
                outputs: Vec::new(),
                error: None,
                result_tx,
            },
        );

        if mode != ExecutionMode::Interactive {
            log::trace!(
                "[session {}] Executing {:?} request {} immediately",
                self.session_id,
                mode,
                execution_id
            );
            return Ok((result_rx, Some(request)));
        }

        match &self.active_interactive {
            None => {
                log::trace!(
                    "[session {}] Executing request {} immediately (no requests are waiting)",
                    self.session_id,
                    execution_id
                );
                self.active_interactive = Some(execution_id);
                Ok((result_rx, Some(request)))
            }
            Some(active) => {
                log::debug!(
                    "[session {}] Queueing request {} (active request is {}; there are {} pending requests)",
                    self.session_id,
                    execution_id,
                    active,
                    self.queued.len()
                );
                self.queued.push_back(request);
                Ok((result_rx, None))
            }
        }
    }

    /// Record the code echo for an execution. Unknown parents are dropped.
    pub fn record_input(&mut self, parent_id: &str, input: JupyterExecuteInput) {
        match self.pending.get_mut(parent_id) {
            Some(entry) => entry.outputs.push(ExecutionOutput::Input(input.code)),
            None => self.drop_unknown(parent_id, "execute_input"),
        }
    }

    /// Record stream output for an execution. Unknown parents are dropped.
    pub fn record_stream(&mut self, parent_id: &str, stream: JupyterStream) {
        match self.pending.get_mut(parent_id) {
            Some(entry) => entry
                .outputs
                .push(ExecutionOutput::Stream(stream.name, stream.text)),
            None => self.drop_unknown(parent_id, "stream"),
        }
    }

    /// Record a display_data or execute_result payload for an execution.
    /// Unknown parents are dropped.
    pub fn record_data(&mut self, parent_id: &str, content: serde_json::Value) {
        match self.pending.get_mut(parent_id) {
            Some(entry) => entry.outputs.push(ExecutionOutput::Data(content)),
            None => self.drop_unknown(parent_id, "data"),
        }
    }

    /// Record an error payload for an execution.
    ///
    /// When the execution was submitted with stop-on-error behavior, the
    /// error is terminal: the execution resolves now instead of waiting for
    /// idle. If resolving it frees the interactive slot, the next queued
    /// request is returned so the caller can deliver it.
    pub fn record_error(
        &mut self,
        parent_id: &str,
        content: serde_json::Value,
    ) -> Option<JupyterMessage> {
        let entry = match self.pending.get_mut(parent_id) {
            Some(entry) => entry,
            None => {
                self.drop_unknown(parent_id, "error");
                return None;
            }
        };

        entry.error = Some(content);
        if entry.stop_on_error {
            return self.resolve(parent_id);
        }
        None
    }

    /// Resolve an execution whose idle status has arrived.
    ///
    /// If resolving it frees the interactive slot, the next queued request is
    /// returned so the caller can deliver it. Idle statuses whose parent is
    /// not pending (late, duplicate, or non-execution parents) are ignored.
    pub fn resolve_idle(&mut self, parent_id: &str) -> Option<JupyterMessage> {
        if !self.pending.contains_key(parent_id) {
            self.drop_unknown(parent_id, "status");
            return None;
        }
        self.resolve(parent_id)
    }

    /// Remove an execution from the pending set and deliver its result.
    fn resolve(&mut self, execution_id: &str) -> Option<JupyterMessage> {
        let entry = self.pending.remove(execution_id)?;

        let result = ExecutionResult {
            execution_id: execution_id.to_string(),
            outputs: entry.outputs,
            error: entry.error,
        };
        log::debug!(
            "[session {}] Execution {} resolved ({})",
            self.session_id,
            execution_id,
            if result.succeeded() { "ok" } else { "error" }
        );
        self.deliver(execution_id, &entry.result_tx, Ok(result));

        // If this was the active interactive execution, promote the next
        // queued request
        if self.active_interactive.as_deref() != Some(execution_id) {
            return None;
        }
        self.active_interactive = None;
        match self.queued.pop_front() {
            Some(request) => {
                log::debug!(
                    "[session {}] Executing pending request {} ({} pending requests remain)",
                    self.session_id,
                    request.header.msg_id,
                    self.queued.len()
                );
                self.active_interactive = Some(request.header.msg_id.clone());
                Some(request)
            }
            None => None,
        }
    }

    /// Discard all queued (not yet delivered) interactive requests, resolving
    /// each as interrupted. Returns the number discarded. The active
    /// execution is left pending; it still resolves when the kernel settles.
    pub fn clear_queued(&mut self) -> usize {
        if !self.queued.is_empty() {
            log::debug!(
                "Discarding {} pending execution requests",
                self.queued.len()
            );
        }
        let discarded: Vec<JupyterMessage> = self.queued.drain(..).collect();
        let count = discarded.len();
        for request in discarded {
            let execution_id = request.header.msg_id;
            if let Some(entry) = self.pending.remove(&execution_id) {
                self.deliver(
                    &execution_id,
                    &entry.result_tx,
                    Err(ElError::ExecutionInterrupted(execution_id.clone())),
                );
            }
        }
        count
    }

    /// Reject every unresolved execution. Called when the session dies; no
    /// execution may be left waiting on a kernel that will never reply.
    pub fn reject_all(&mut self, reason: &str) {
        if !self.pending.is_empty() {
            log::debug!(
                "[session {}] Rejecting {} unresolved executions: {}",
                self.session_id,
                self.pending.len(),
                reason
            );
        }
        for (execution_id, entry) in self.pending.drain() {
            let result = Err(ElError::SessionTerminated(reason.to_string()));
            if let Err(e) = entry.result_tx.try_send(result) {
                log::trace!(
                    "Could not deliver rejection for execution {}: {}",
                    execution_id,
                    e
                );
            }
        }
        self.queued.clear();
        self.active_interactive = None;
    }

    fn deliver(
        &self,
        execution_id: &str,
        result_tx: &Sender<Result<ExecutionResult, ElError>>,
        result: Result<ExecutionResult, ElError>,
    ) {
        // The receiver may have been dropped; that just means nobody is
        // waiting for this outcome any more
        if let Err(e) = result_tx.try_send(result) {
            log::trace!(
                "[session {}] Could not deliver result for execution {}: {}",
                self.session_id,
                execution_id,
                e
            );
        }
    }

    fn drop_unknown(&self, parent_id: &str, msg_type: &str) {
        log::trace!(
            "[session {}] Dropping {} message for unknown execution {}",
            self.session_id,
            msg_type,
            parent_id
        );
    }

    /// The mode an execution was submitted with, if it is still pending.
    pub fn mode(&self, execution_id: &str) -> Option<ExecutionMode> {
        self.pending.get(execution_id).map(|entry| entry.mode)
    }
}
