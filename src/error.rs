use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug)]
pub enum ShellError {
    Io(std::io::Error),
    Sys(nix::Error),
    LineEditor(String),
    Parse(String),
    Usage { command: String, message: String },
    NoSuchJob(u32),
    NoSuchProcess(i32),
    NoSuchIndex { job: u32, index: usize },
    AlreadyForeground(u32),
    SpawnFailed { stage: usize, cause: nix::Error },
    TerminalControl(nix::Error),
}

impl Display for ShellError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ShellError::Io(e) => write!(f, "{}", e),
            ShellError::Sys(e) => write!(f, "{}", e),
            ShellError::LineEditor(e) => write!(f, "{}", e),
            ShellError::Parse(msg) => write!(f, "{}", msg),
            ShellError::Usage { message, .. } => write!(f, "{}", message),
            ShellError::NoSuchJob(num) => write!(f, "No such job: {}", num),
            ShellError::NoSuchProcess(pid) => write!(f, "No such process: {}", pid),
            ShellError::NoSuchIndex { job, index } => {
                write!(f, "Job {} has no process at index {}", job, index)
            }
            ShellError::AlreadyForeground(num) => {
                write!(f, "Job {} already holds the foreground", num)
            }
            ShellError::SpawnFailed { stage, cause } => {
                write!(f, "failed to spawn pipeline stage {}: {}", stage, cause)
            }
            ShellError::TerminalControl(e) => write!(f, "terminal handoff failed: {}", e),
        }
    }
}

impl From<std::io::Error> for ShellError {
    fn from(value: std::io::Error) -> Self {
        ShellError::Io(value)
    }
}

impl From<nix::Error> for ShellError {
    fn from(value: nix::Error) -> Self {
        ShellError::Sys(value)
    }
}
