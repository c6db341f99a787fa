//
// jupyter_messages.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
// Licensed under the Elastic License 2.0. See LICENSE.txt for license information.
//
//

use elshared::{jupyter_message::JupyterMessage, kernel_message::OutputStream};
use serde::Deserialize;

/// An enum of message types we know how to handle from Jupyter. This is in no
/// way exhaustive; it just includes the types we care about.
pub enum JupyterMsg {
    ExecuteInput(JupyterExecuteInput),
    Stream(JupyterStream),
    DisplayData,
    ExecuteResult,
    Error(JupyterError),
    Status(JupyterStatus),
    InputRequest,
    Other,
}

/// Convert a JupyterMessage (generic type) into a JupyterMsg (specific type)
impl From<&JupyterMessage> for JupyterMsg {
    fn from(msg: &JupyterMessage) -> Self {
        match msg.header.msg_type.as_str() {
            "execute_input" => {
                match serde_json::from_value::<JupyterExecuteInput>(msg.content.clone()) {
                    Ok(content) => JupyterMsg::ExecuteInput(content),
                    Err(_) => JupyterMsg::Other,
                }
            }
            "stream" => match serde_json::from_value::<JupyterStream>(msg.content.clone()) {
                Ok(content) => JupyterMsg::Stream(content),
                Err(_) => JupyterMsg::Other,
            },
            "display_data" => JupyterMsg::DisplayData,
            "execute_result" => JupyterMsg::ExecuteResult,
            "error" => match serde_json::from_value::<JupyterError>(msg.content.clone()) {
                Ok(content) => JupyterMsg::Error(content),
                Err(_) => JupyterMsg::Other,
            },
            "status" => match serde_json::from_value::<JupyterStatus>(msg.content.clone()) {
                Ok(content) => JupyterMsg::Status(content),
                Err(_) => JupyterMsg::Other,
            },
            "input_request" => JupyterMsg::InputRequest,
            _ => JupyterMsg::Other,
        }
    }
}

/// The content of an `execute_input` message: the code echoed back by the
/// kernel before it runs.
#[derive(Deserialize)]
pub struct JupyterExecuteInput {
    pub code: String,
}

/// The content of a `stream` message.
#[derive(Deserialize)]
pub struct JupyterStream {
    pub name: OutputStream,
    pub text: String,
}

/// The content of an `error` message.
#[derive(Deserialize)]
pub struct JupyterError {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Starting,
    Busy,
    Idle,
}

/// The content of a `status` message.
#[derive(Deserialize)]
pub struct JupyterStatus {
    pub execution_state: ExecutionState,
}
