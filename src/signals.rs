use std::process;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use libc::STDIN_FILENO;
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, killpg, sigaction, sigprocmask,
};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, Pid};

use crate::error::ShellError;
use crate::jobs::{self, ProcessState};

static SHELL_PGID: AtomicI32 = AtomicI32::new(0);
static ON_A_TTY: AtomicBool = AtomicBool::new(false);

/// Installs the shell's dispositions. SIGTTIN/SIGTTOU are ignored so the
/// shell can call `tcsetpgrp` while it is not the terminal's owner.
pub fn install() -> Result<(), ShellError> {
    let restart = SaFlags::SA_RESTART;
    unsafe {
        sigaction(
            Signal::SIGCHLD,
            &SigAction::new(SigHandler::Handler(on_sigchld), restart, SigSet::empty()),
        )?;
        for sig in [Signal::SIGINT, Signal::SIGTSTP] {
            sigaction(
                sig,
                &SigAction::new(
                    SigHandler::Handler(on_terminal_signal),
                    restart,
                    SigSet::empty(),
                ),
            )?;
        }
        sigaction(
            Signal::SIGQUIT,
            &SigAction::new(SigHandler::Handler(on_sigquit), restart, SigSet::empty()),
        )?;
        for sig in [Signal::SIGTTIN, Signal::SIGTTOU] {
            sigaction(
                sig,
                &SigAction::new(SigHandler::SigIgn, restart, SigSet::empty()),
            )?;
        }
    }
    Ok(())
}

/// Puts the shell in its own process group and, when stdin is a terminal,
/// takes ownership of it. Must run after [`install`]: the handoff relies on
/// SIGTTOU being ignored.
pub fn init_terminal() -> Result<(), ShellError> {
    let pid = unistd::getpid();
    // Fails with EPERM if we already lead our own session; that is fine.
    let _ = unistd::setpgid(pid, pid);
    SHELL_PGID.store(unistd::getpgrp().as_raw(), Ordering::SeqCst);

    if unistd::isatty(STDIN_FILENO).unwrap_or(false) {
        ON_A_TTY.store(true, Ordering::SeqCst);
        unistd::tcsetpgrp(STDIN_FILENO, unistd::getpgrp())
            .map_err(ShellError::TerminalControl)?;
    }
    Ok(())
}

pub fn shell_pgid() -> Pid {
    Pid::from_raw(SHELL_PGID.load(Ordering::SeqCst))
}

/// Hands the terminal to a job's process group. A no-op when stdin is not a
/// terminal.
pub fn give_terminal_to(gid: Pid) -> Result<(), ShellError> {
    if !ON_A_TTY.load(Ordering::SeqCst) {
        return Ok(());
    }
    unistd::tcsetpgrp(STDIN_FILENO, gid).map_err(ShellError::TerminalControl)
}

/// Returns the terminal to the shell. Called from the SIGCHLD handler, so it
/// is limited to one syscall and two atomic loads.
fn reclaim_terminal() {
    if !ON_A_TTY.load(Ordering::SeqCst) {
        return;
    }
    let _ = unistd::tcsetpgrp(STDIN_FILENO, shell_pgid());
}

/// Blocks the signals whose handlers touch the job table, restoring the
/// previous mask on drop.
pub struct MaskGuard {
    prev: SigSet,
}

impl MaskGuard {
    pub fn block() -> Self {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        set.add(Signal::SIGINT);
        set.add(Signal::SIGTSTP);
        let mut prev = SigSet::empty();
        let _ = sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut prev));
        Self { prev }
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.prev), None);
    }
}

/// Parks the REPL until the foreground slot empties. The predicate is only
/// checked with the mask in place; `sigsuspend` opens the mask atomically,
/// so a SIGCHLD landing between check and suspend cannot be lost.
pub fn wait_for_foreground() {
    let _mask = MaskGuard::block();
    while jobs::with_table(|table| table.has_foreground()) {
        unsafe {
            let mut empty: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut empty);
            libc::sigsuspend(&empty);
        }
    }
}

/// Resets the dispositions and mask a pipeline stage inherits, before exec.
pub fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [
        Signal::SIGINT,
        Signal::SIGTSTP,
        Signal::SIGQUIT,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGCHLD,
    ] {
        unsafe {
            let _ = sigaction(sig, &default);
        }
    }
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
}

extern "C" fn on_sigchld(_: libc::c_int) {
    // Deliveries coalesce; drain every pending transition in one pass.
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                apply_transition(pid, ProcessState::Terminated);
            }
            Ok(WaitStatus::Stopped(pid, _)) => apply_transition(pid, ProcessState::Stopped),
            Ok(WaitStatus::Continued(pid)) => apply_transition(pid, ProcessState::Running),
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

fn apply_transition(pid: Pid, state: ProcessState) {
    jobs::with_table_in_handler(|table| {
        if !table.contains_process(pid) {
            // Not one of ours.
            return;
        }
        let _ = table.set_process_state(pid, state);
        if table.settle_foreground() {
            reclaim_terminal();
        }
    });
}

extern "C" fn on_terminal_signal(sig: libc::c_int) {
    let Ok(sig) = Signal::try_from(sig) else {
        return;
    };
    jobs::with_table_in_handler(|table| {
        if let Some(fg) = table.foreground() {
            let _ = killpg(fg.gid, sig);
        }
    });
}

extern "C" fn on_sigquit(_: libc::c_int) {
    process::exit(0);
}
