//! The Execution Channel: message protocol plus a pure assembler that
//! resolves a kernel message stream into one precedence-ordered outcome.

pub mod channel;
pub mod protocol;

pub use channel::ExecutionAssembler;
pub use protocol::{ExecutionOutcome, ExecutionState, KernelMessage};
