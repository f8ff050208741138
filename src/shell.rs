use nix::unistd::{self, Pid};

use crate::builtins::{BuiltinResult, try_handle_builtin};
use crate::error::ShellError;
use crate::exec;
use crate::parser::parse_command_line;

pub struct Shell {
    pub pid: Pid,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            pid: unistd::getpid(),
        }
    }

    /// One REPL iteration past the read: parse, dispatch a builtin, or
    /// launch a job. Errors bubble up to the loop for reporting.
    pub fn run_line(&mut self, line: &str) -> Result<(), ShellError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        let pipeline = parse_command_line(trimmed)?;
        match try_handle_builtin(&pipeline)? {
            BuiltinResult::Handled => Ok(()),
            BuiltinResult::NotHandled => exec::launch(&pipeline),
        }
    }
}
