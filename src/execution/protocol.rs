//! Wire types for the Execution Channel — the message stream a sandbox
//! agent emits while running one piece of user code.

use serde::{Deserialize, Serialize};

/// A message emitted by the interpreter kernel inside a sandbox while it
/// runs one execution request. Mirrors the data a Jupyter-style kernel
/// emits over its iopub channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelMessage {
    /// Raw text written to stdout/stderr during execution.
    Stream { text: String },
    /// The value of the last expression in the cell, if any.
    ExecuteResult { text: Option<String>, image_base64: Option<String> },
    /// An explicit rich display, e.g. a plotted figure.
    DisplayData { image_base64: Option<String>, text: Option<String> },
    /// An exception raised by user code.
    Error { ename: String, evalue: String, traceback: Vec<String> },
    /// Kernel busy/idle transitions. `Idle` marks the end of the stream.
    Status { execution_state: ExecutionState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Busy,
    Idle,
}

/// The final, precedence-resolved result of one execution: error beats
/// image, image beats text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Error { message: String },
    Image { mime: String, base64_data: String },
    Text { text: String },
    /// The kernel went idle without producing any result, error, or stream
    /// output.
    Empty,
}
