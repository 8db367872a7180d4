//! Verification helpers for asserting on the commands a run issued

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected a command containing '{expected}', got {actual:?}")]
    CommandMissing {
        expected: String,
        actual: Vec<String>,
    },

    #[error("Command containing '{unexpected}' was executed: {command}")]
    UnexpectedCommand { unexpected: String, command: String },

    #[error("Expected {expected} commands, found {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Command containing '{first}' did not run before '{second}'")]
    OrderMismatch { first: String, second: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Command execution verifier
pub struct CommandVerifier {
    captured_commands: Vec<String>,
}

impl CommandVerifier {
    pub fn new(captured_commands: Vec<String>) -> Self {
        Self { captured_commands }
    }

    fn position(&self, pattern: &str) -> Option<usize> {
        self.captured_commands
            .iter()
            .position(|cmd| cmd.contains(pattern))
    }

    /// Verify that a command containing `expected` was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        match self.position(expected) {
            Some(_) => Ok(()),
            None => Err(VerificationError::CommandMissing {
                expected: expected.to_string(),
                actual: self.captured_commands.clone(),
            }),
        }
    }

    /// Verify that no command containing `unexpected` was executed
    pub fn assert_command_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        match self.position(unexpected) {
            Some(i) => Err(VerificationError::UnexpectedCommand {
                unexpected: unexpected.to_string(),
                command: self.captured_commands[i].clone(),
            }),
            None => Ok(()),
        }
    }

    /// Verify the number of commands executed
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured_commands.len();
        if actual != expected {
            return Err(VerificationError::CountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Verify that the first command matching `first` precedes the first matching `second`
    pub fn assert_executed_before(&self, first: &str, second: &str) -> VerifyResult<()> {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            _ => Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    pub fn captured_commands(&self) -> &[String] {
        &self.captured_commands
    }
}
