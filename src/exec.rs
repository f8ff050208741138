use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::process;

use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::fcntl::{OFlag, open};
use nix::sys::signal::{Signal, killpg};
use nix::sys::stat::Mode;
use nix::unistd::{self, ForkResult, Pid};

use crate::diagnostics;
use crate::error::ShellError;
use crate::jobs::{self, JobState, Process};
use crate::parser::{Command, Pipeline};
use crate::signals::{self, MaskGuard};

/// Spawns a pipeline as one job. Returns as soon as a background job is
/// fully forked; for a foreground job it also hands over the terminal and
/// blocks until the job leaves the foreground slot.
pub fn launch(pipeline: &Pipeline) -> Result<(), ShellError> {
    let stages = pipeline.commands.len();
    let state = if pipeline.background {
        JobState::Background
    } else {
        JobState::Foreground
    };

    // A child can exit before its pid lands in the table; keep SIGCHLD out
    // until every stage is recorded, then let the handler drain the backlog.
    let _mask = MaskGuard::block();

    let num = jobs::with_table(|table| table.add_job(state))?;

    let mut pipes: Vec<(RawFd, RawFd)> = Vec::with_capacity(stages.saturating_sub(1));
    for stage in 0..stages.saturating_sub(1) {
        match unistd::pipe2(OFlag::O_CLOEXEC) {
            Ok(ends) => pipes.push(ends),
            Err(cause) => {
                close_endpoints(&pipes);
                jobs::with_table(|table| table.remove_if_empty(num));
                return Err(ShellError::SpawnFailed { stage, cause });
            }
        }
    }

    let mut gid = Pid::from_raw(0);
    for (stage, command) in pipeline.commands.iter().enumerate() {
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => run_stage(pipeline, stage, &pipes, gid),
            Ok(ForkResult::Parent { child }) => {
                if stage == 0 {
                    gid = child;
                }
                // The child may exec before we get here; it makes the same
                // call on its side, and both are idempotent.
                let _ = unistd::setpgid(child, gid);
                jobs::with_table(|table| {
                    table.add_process(num, Process::new(child, command.clone()))
                })?;
            }
            Err(cause) => {
                close_endpoints(&pipes);
                if stage == 0 {
                    jobs::with_table(|table| table.remove_if_empty(num));
                } else {
                    // Already-forked stages get torn down; normal reaping
                    // clears them out of the table.
                    let _ = killpg(gid, Signal::SIGTERM);
                }
                return Err(ShellError::SpawnFailed { stage, cause });
            }
        }
    }
    close_endpoints(&pipes);

    if pipeline.background {
        let pids = jobs::with_table(|table| table.job_by_num(num).map(|job| job.pids()))?;
        let pids: Vec<String> = pids.iter().map(|p| p.to_string()).collect();
        println!("[{}] {}", num, pids.join(" "));
    } else {
        if let Err(err) = signals::give_terminal_to(gid) {
            // Degraded but alive: the job keeps running, we still wait.
            diagnostics::print_error(&err);
        }
        signals::wait_for_foreground();
    }
    Ok(())
}

fn close_endpoints(pipes: &[(RawFd, RawFd)]) {
    for (read_end, write_end) in pipes {
        let _ = unistd::close(*read_end);
        let _ = unistd::close(*write_end);
    }
}

/// Child side of one stage: default signal dispositions, own process group,
/// stdin/stdout wiring, then exec. Never returns to the REPL.
fn run_stage(pipeline: &Pipeline, stage: usize, pipes: &[(RawFd, RawFd)], gid: Pid) -> ! {
    signals::reset_for_child();
    let group = if stage == 0 { Pid::from_raw(0) } else { gid };
    let _ = unistd::setpgid(Pid::from_raw(0), group);

    let last = pipeline.commands.len() - 1;
    if stage == 0 {
        if let Some(path) = &pipeline.input {
            match open(path.as_str(), OFlag::O_RDONLY, Mode::empty()) {
                Ok(fd) => redirect(fd, STDIN_FILENO),
                Err(err) => fail_stage(&format!("{}: {}", path, err)),
            }
        }
    } else {
        redirect_keep(pipes[stage - 1].0, STDIN_FILENO);
    }
    if stage == last {
        if let Some(path) = &pipeline.output {
            let flags = OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC;
            match open(path.as_str(), flags, Mode::from_bits_truncate(0o644)) {
                Ok(fd) => redirect(fd, STDOUT_FILENO),
                Err(err) => fail_stage(&format!("{}: {}", path, err)),
            }
        }
    } else {
        redirect_keep(pipes[stage].1, STDOUT_FILENO);
    }
    close_endpoints(pipes);

    let command = &pipeline.commands[stage];
    let argv = match build_argv(command) {
        Ok(argv) => argv,
        Err(msg) => fail_stage(&msg),
    };
    let _ = unistd::execvp(&argv[0], &argv);
    // exec only comes back on failure
    eprintln!("{}: Command not found.", command.program);
    process::exit(127);
}

fn build_argv(command: &Command) -> Result<Vec<CString>, String> {
    let mut argv = Vec::with_capacity(command.arguments.len() + 1);
    for word in std::iter::once(&command.program).chain(command.arguments.iter()) {
        argv.push(
            CString::new(word.as_str())
                .map_err(|_| format!("{}: argument contains a NUL byte", command.program))?,
        );
    }
    Ok(argv)
}

fn redirect(from: RawFd, to: RawFd) {
    redirect_keep(from, to);
    let _ = unistd::close(from);
}

fn redirect_keep(from: RawFd, to: RawFd) {
    if unistd::dup2(from, to).is_err() {
        fail_stage("failed to wire pipeline descriptors");
    }
}

fn fail_stage(message: &str) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}
