//! `ExecutionAssembler`: a pure state-reducer over [`KernelMessage`]s.
//!
//! Folding the message stream into a final [`ExecutionOutcome`] this way,
//! rather than threading partial state through the transport layer, keeps
//! the error > image > text precedence rule unit-testable without a real
//! interpreter kernel or sandbox process.

use super::protocol::{ExecutionOutcome, ExecutionState, KernelMessage};

#[derive(Debug, Default)]
pub struct ExecutionAssembler {
    stdout: String,
    image: Option<(String, String)>,
    error: Option<String>,
    done: bool,
}

impl ExecutionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one message into the assembler's state. Safe to call after
    /// completion (a well-behaved kernel never emits past `Status{Idle}` or
    /// an `Error`, but a malformed stream should not panic the gateway) —
    /// messages after `done` are ignored.
    pub fn push(&mut self, message: KernelMessage) {
        if self.done {
            return;
        }
        match message {
            KernelMessage::Stream { text } => self.stdout.push_str(&text),
            KernelMessage::ExecuteResult { text, image_base64 } => {
                // An image overwrites any previous one (last wins); text
                // appends to the same buffer `stream` chunks fill.
                if let Some(img) = image_base64 {
                    self.image = Some(("image/png".to_string(), img));
                }
                if let Some(t) = text {
                    self.stdout.push_str(&t);
                }
            }
            KernelMessage::DisplayData { image_base64, text } => {
                if let Some(img) = image_base64 {
                    self.image = Some(("image/png".to_string(), img));
                }
                if let Some(t) = text {
                    self.stdout.push_str(&t);
                }
            }
            KernelMessage::Error { ename, evalue, .. } => {
                // An error terminates assembly immediately.
                self.error = Some(format!("{ename}: {evalue}"));
                self.done = true;
            }
            KernelMessage::Status { execution_state: ExecutionState::Idle } => {
                self.done = true;
            }
            KernelMessage::Status { execution_state: ExecutionState::Busy } => {}
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Resolves the accumulated state into a single outcome. Can be called
    /// before `is_done()` to preview the in-flight result, but is normally
    /// only observed once the kernel reports idle.
    pub fn finish(self) -> ExecutionOutcome {
        if let Some(message) = self.error {
            return ExecutionOutcome::Error { message };
        }
        if let Some((mime, base64_data)) = self.image {
            return ExecutionOutcome::Image { mime, base64_data };
        }
        if !self.stdout.is_empty() {
            return ExecutionOutcome::Text { text: self.stdout };
        }
        ExecutionOutcome::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> KernelMessage {
        KernelMessage::Status { execution_state: ExecutionState::Idle }
    }

    #[test]
    fn plain_stdout_becomes_text() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Stream { text: "101\n".to_string() });
        a.push(idle());
        assert!(a.is_done());
        assert_eq!(a.finish(), ExecutionOutcome::Text { text: "101\n".to_string() });
    }

    #[test]
    fn error_takes_precedence_over_stream_and_image() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Stream { text: "partial output\n".to_string() });
        a.push(KernelMessage::DisplayData {
            image_base64: Some("aGVsbG8=".to_string()),
            text: None,
        });
        a.push(KernelMessage::Error {
            ename: "SyntaxError".to_string(),
            evalue: "unexpected EOF".to_string(),
            traceback: vec![],
        });
        a.push(idle());
        assert_eq!(
            a.finish(),
            ExecutionOutcome::Error { message: "SyntaxError: unexpected EOF".to_string() }
        );
    }

    #[test]
    fn image_takes_precedence_over_text() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Stream { text: "some log line\n".to_string() });
        a.push(KernelMessage::DisplayData {
            image_base64: Some("aGVsbG8=".to_string()),
            text: None,
        });
        a.push(idle());
        assert_eq!(
            a.finish(),
            ExecutionOutcome::Image { mime: "image/png".to_string(), base64_data: "aGVsbG8=".to_string() }
        );
    }

    #[test]
    fn empty_stream_yields_empty_outcome() {
        let mut a = ExecutionAssembler::new();
        a.push(idle());
        assert_eq!(a.finish(), ExecutionOutcome::Empty);
    }

    #[test]
    fn messages_after_idle_are_ignored() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Stream { text: "before\n".to_string() });
        a.push(idle());
        a.push(KernelMessage::Stream { text: "after\n".to_string() });
        assert_eq!(a.finish(), ExecutionOutcome::Text { text: "before\n".to_string() });
    }

    #[test]
    fn last_image_wins_when_multiple_display_events_occur() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::DisplayData { image_base64: Some("first".to_string()), text: None });
        a.push(KernelMessage::DisplayData { image_base64: Some("second".to_string()), text: None });
        a.push(idle());
        assert_eq!(
            a.finish(),
            ExecutionOutcome::Image { mime: "image/png".to_string(), base64_data: "second".to_string() }
        );
    }

    #[test]
    fn error_terminates_assembly_immediately() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Error {
            ename: "SyntaxError".to_string(),
            evalue: "unexpected EOF".to_string(),
            traceback: vec![],
        });
        assert!(a.is_done());
        // Messages arriving after the error (a malformed or racing stream)
        // must not be folded in.
        a.push(KernelMessage::Stream { text: "should be ignored\n".to_string() });
        assert_eq!(
            a.finish(),
            ExecutionOutcome::Error { message: "SyntaxError: unexpected EOF".to_string() }
        );
    }

    #[test]
    fn execute_result_text_appends_to_the_same_buffer_as_stream() {
        let mut a = ExecutionAssembler::new();
        a.push(KernelMessage::Stream { text: "building...\n".to_string() });
        a.push(KernelMessage::ExecuteResult { text: Some("42".to_string()), image_base64: None });
        a.push(idle());
        assert_eq!(a.finish(), ExecutionOutcome::Text { text: "building...\n42".to_string() });
    }
}
