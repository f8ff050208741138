use std::fmt::{Display, Formatter, Result as FmtResult, Write as _};
use std::sync::Mutex;

use nix::unistd::Pid;

use crate::error::ShellError;
use crate::parser::Command;
use crate::signals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
    Terminated,
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            ProcessState::Running => "Running",
            ProcessState::Stopped => "Stopped",
            ProcessState::Terminated => "Terminated",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Foreground,
    Background,
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            JobState::Foreground => "Foreground",
            JobState::Background => "Background",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    pub command: Command,
    pub state: ProcessState,
}

impl Process {
    pub fn new(pid: Pid, command: Command) -> Self {
        Self {
            pid,
            command,
            state: ProcessState::Running,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub num: u32,
    pub gid: Pid,
    pub state: JobState,
    pub processes: Vec<Process>,
}

impl Job {
    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(|p| p.pid).collect()
    }

    fn any_running(&self) -> bool {
        self.processes
            .iter()
            .any(|p| p.state == ProcessState::Running)
    }

    fn all_terminated(&self) -> bool {
        !self.processes.is_empty()
            && self
                .processes
                .iter()
                .all(|p| p.state == ProcessState::Terminated)
    }
}

/// Live jobs, ordered by ascending number. Removal happens only in
/// [`JobTable::synchronize`], so every job here still has at least one
/// process that has not terminated.
#[derive(Debug)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub const fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    /// Allocates the next job number and inserts an empty job. The group id
    /// stays unset until the first process is appended.
    pub fn add_job(&mut self, state: JobState) -> Result<u32, ShellError> {
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                return Err(ShellError::AlreadyForeground(fg.num));
            }
        }
        let num = self.jobs.iter().map(|j| j.num).max().map_or(1, |m| m + 1);
        self.jobs.push(Job {
            num,
            gid: Pid::from_raw(0),
            state,
            processes: Vec::new(),
        });
        Ok(num)
    }

    /// Appends a process; the first one becomes the group leader.
    pub fn add_process(&mut self, num: u32, process: Process) -> Result<(), ShellError> {
        let job = self.job_by_num_mut(num)?;
        if job.processes.is_empty() {
            job.gid = process.pid;
        }
        job.processes.push(process);
        Ok(())
    }

    pub fn contains_job(&self, num: u32) -> bool {
        self.jobs.iter().any(|j| j.num == num)
    }

    pub fn contains_process(&self, pid: Pid) -> bool {
        self.jobs
            .iter()
            .any(|j| j.processes.iter().any(|p| p.pid == pid))
    }

    pub fn job_by_num(&self, num: u32) -> Result<&Job, ShellError> {
        self.jobs
            .iter()
            .find(|j| j.num == num)
            .ok_or(ShellError::NoSuchJob(num))
    }

    fn job_by_num_mut(&mut self, num: u32) -> Result<&mut Job, ShellError> {
        self.jobs
            .iter_mut()
            .find(|j| j.num == num)
            .ok_or(ShellError::NoSuchJob(num))
    }

    pub fn job_by_pid(&self, pid: Pid) -> Result<&Job, ShellError> {
        self.jobs
            .iter()
            .find(|j| j.processes.iter().any(|p| p.pid == pid))
            .ok_or(ShellError::NoSuchProcess(pid.as_raw()))
    }

    /// Records a wait-status transition for one process, then synchronizes
    /// the owning job.
    pub fn set_process_state(&mut self, pid: Pid, state: ProcessState) -> Result<(), ShellError> {
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.processes.iter().any(|p| p.pid == pid))
            .ok_or(ShellError::NoSuchProcess(pid.as_raw()))?;
        for process in &mut job.processes {
            if process.pid == pid {
                process.state = state;
            }
        }
        let num = job.num;
        self.synchronize(num);
        Ok(())
    }

    /// Moves a job between foreground and background. The caller keeps the
    /// single-foreground invariant: promoting while another job holds the
    /// foreground is an error, never an implicit demotion.
    pub fn set_job_state(&mut self, num: u32, state: JobState) -> Result<(), ShellError> {
        if state == JobState::Foreground {
            if let Some(fg) = self.foreground() {
                if fg.num != num {
                    return Err(ShellError::AlreadyForeground(fg.num));
                }
            }
        }
        self.job_by_num_mut(num)?.state = state;
        Ok(())
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.jobs.iter().find(|j| j.state == JobState::Foreground)
    }

    pub fn has_foreground(&self) -> bool {
        self.foreground().is_some()
    }

    /// Drops the job once every process has terminated. The only removal
    /// site in the table.
    pub fn synchronize(&mut self, num: u32) {
        self.jobs.retain(|j| !(j.num == num && j.all_terminated()));
    }

    /// Spawn-failure cleanup: a job that never received a process must not
    /// linger, since no wait status will ever arrive for it.
    pub fn remove_if_empty(&mut self, num: u32) {
        self.jobs.retain(|j| j.num != num || !j.processes.is_empty());
    }

    /// Post-wait bookkeeping for the foreground slot. A foreground job with
    /// no runnable process left is demoted to the background (fully
    /// terminated jobs are already gone by the time this runs). Returns true
    /// when the shell should take the terminal back.
    pub fn settle_foreground(&mut self) -> bool {
        match self.jobs.iter_mut().find(|j| j.state == JobState::Foreground) {
            None => true,
            Some(job) => {
                if job.any_running() {
                    false
                } else {
                    job.state = JobState::Background;
                    true
                }
            }
        }
    }

    /// Deterministic listing for the `jobs` builtin: one header per live job
    /// in ascending number order, one line per process under it.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for job in &self.jobs {
            let _ = writeln!(out, "[{}] {}", job.num, job.state);
            for process in &job.processes {
                let _ = writeln!(
                    out,
                    "    {:<8}{:<12}{}",
                    process.pid.as_raw(),
                    process.state,
                    process.command
                );
            }
        }
        out
    }
}

// The one piece of process-wide state: signal handlers observe child
// transitions and have to find the table without a handle being threaded
// through them.
static TABLE: Mutex<JobTable> = Mutex::new(JobTable::new());

/// Runs `f` with the table locked and child-state signals blocked, so a
/// handler can never observe (or interleave with) a half-finished mutation.
pub fn with_table<R>(f: impl FnOnce(&mut JobTable) -> R) -> R {
    let _mask = signals::MaskGuard::block();
    let mut table = TABLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut table)
}

/// Handler-side access. The REPL thread only holds the lock with those same
/// signals blocked, so this lock is always uncontended by the time a handler
/// runs; same-numbered signals are blocked during delivery.
pub(crate) fn with_table_in_handler(f: impl FnOnce(&mut JobTable)) {
    if let Ok(mut table) = TABLE.lock() {
        f(&mut table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Command {
        let mut words = line.split_whitespace().map(str::to_string);
        Command {
            program: words.next().unwrap(),
            arguments: words.collect(),
        }
    }

    fn spawn(table: &mut JobTable, state: JobState, pids: &[i32], line: &str) -> u32 {
        let num = table.add_job(state).unwrap();
        for pid in pids {
            table
                .add_process(num, Process::new(Pid::from_raw(*pid), command(line)))
                .unwrap();
        }
        num
    }

    #[test]
    fn numbers_grow_from_the_highest_live_job() {
        let mut table = JobTable::new();
        let first = spawn(&mut table, JobState::Background, &[100], "sleep 1");
        let second = spawn(&mut table, JobState::Background, &[200], "sleep 2");
        assert_eq!((first, second), (1, 2));

        table
            .set_process_state(Pid::from_raw(100), ProcessState::Terminated)
            .unwrap();
        let third = spawn(&mut table, JobState::Background, &[300], "sleep 3");
        assert_eq!(third, 3);
    }

    #[test]
    fn numbering_restarts_once_the_table_empties() {
        let mut table = JobTable::new();
        spawn(&mut table, JobState::Background, &[100], "sleep 1");
        spawn(&mut table, JobState::Background, &[200], "sleep 2");
        for pid in [100, 200] {
            table
                .set_process_state(Pid::from_raw(pid), ProcessState::Terminated)
                .unwrap();
        }
        assert_eq!(spawn(&mut table, JobState::Background, &[300], "ls"), 1);
    }

    #[test]
    fn first_process_becomes_group_leader() {
        let mut table = JobTable::new();
        let num = spawn(&mut table, JobState::Background, &[41, 42, 43], "a | b | c");
        let job = table.job_by_num(num).unwrap();
        assert_eq!(job.gid, Pid::from_raw(41));
        assert_eq!(job.pids(), vec![
            Pid::from_raw(41),
            Pid::from_raw(42),
            Pid::from_raw(43)
        ]);
    }

    #[test]
    fn at_most_one_foreground_job() {
        let mut table = JobTable::new();
        let fg = spawn(&mut table, JobState::Foreground, &[10], "cat");
        assert!(matches!(
            table.add_job(JobState::Foreground),
            Err(ShellError::AlreadyForeground(n)) if n == fg
        ));

        let bg = spawn(&mut table, JobState::Background, &[20], "sleep 5");
        assert!(matches!(
            table.set_job_state(bg, JobState::Foreground),
            Err(ShellError::AlreadyForeground(_))
        ));

        table.set_job_state(fg, JobState::Background).unwrap();
        table.set_job_state(bg, JobState::Foreground).unwrap();
        assert_eq!(table.foreground().unwrap().num, bg);
    }

    #[test]
    fn job_leaves_table_when_every_process_terminates() {
        let mut table = JobTable::new();
        let num = spawn(&mut table, JobState::Background, &[11, 12], "a | b");

        table
            .set_process_state(Pid::from_raw(11), ProcessState::Terminated)
            .unwrap();
        assert!(table.contains_job(num));

        table
            .set_process_state(Pid::from_raw(12), ProcessState::Terminated)
            .unwrap();
        assert!(!table.contains_job(num));
        assert!(!table.contains_process(Pid::from_raw(11)));
        assert_eq!(table.render(), "");
    }

    #[test]
    fn lookups_fail_for_unknown_targets() {
        let mut table = JobTable::new();
        assert!(matches!(table.job_by_num(7), Err(ShellError::NoSuchJob(7))));
        assert!(matches!(
            table.job_by_pid(Pid::from_raw(999)),
            Err(ShellError::NoSuchProcess(999))
        ));
        assert!(matches!(
            table.set_process_state(Pid::from_raw(999), ProcessState::Stopped),
            Err(ShellError::NoSuchProcess(999))
        ));
    }

    #[test]
    fn settle_demotes_a_fully_stopped_foreground_job() {
        let mut table = JobTable::new();
        let num = spawn(&mut table, JobState::Foreground, &[21, 22], "a | b");
        assert!(!table.settle_foreground());

        table
            .set_process_state(Pid::from_raw(21), ProcessState::Stopped)
            .unwrap();
        assert!(!table.settle_foreground());

        table
            .set_process_state(Pid::from_raw(22), ProcessState::Stopped)
            .unwrap();
        assert!(table.settle_foreground());
        assert_eq!(table.job_by_num(num).unwrap().state, JobState::Background);
        assert!(!table.has_foreground());
    }

    #[test]
    fn settle_reclaims_when_no_foreground_job_exists() {
        let mut table = JobTable::new();
        assert!(table.settle_foreground());

        spawn(&mut table, JobState::Background, &[31], "sleep 9");
        assert!(table.settle_foreground());
    }

    #[test]
    fn settle_demotes_on_mixed_stopped_and_terminated() {
        let mut table = JobTable::new();
        let num = spawn(&mut table, JobState::Foreground, &[51, 52], "a | b");
        table
            .set_process_state(Pid::from_raw(51), ProcessState::Terminated)
            .unwrap();
        table
            .set_process_state(Pid::from_raw(52), ProcessState::Stopped)
            .unwrap();
        assert!(table.settle_foreground());
        assert_eq!(table.job_by_num(num).unwrap().state, JobState::Background);
    }

    #[test]
    fn remove_if_empty_only_drops_processless_jobs() {
        let mut table = JobTable::new();
        let empty = table.add_job(JobState::Background).unwrap();
        let full = spawn(&mut table, JobState::Background, &[61], "sleep 1");

        table.remove_if_empty(empty);
        table.remove_if_empty(full);
        assert!(!table.contains_job(empty));
        assert!(table.contains_job(full));
    }

    #[test]
    fn render_is_deterministic() {
        let mut table = JobTable::new();
        let piped = table.add_job(JobState::Background).unwrap();
        table
            .add_process(piped, Process::new(Pid::from_raw(100), command("cat")))
            .unwrap();
        table
            .add_process(piped, Process::new(Pid::from_raw(101), command("wc -l")))
            .unwrap();
        let stopped = spawn(&mut table, JobState::Background, &[200], "sleep 100");
        table
            .set_process_state(Pid::from_raw(200), ProcessState::Stopped)
            .unwrap();
        table.set_job_state(stopped, JobState::Foreground).unwrap();

        assert_eq!(
            table.render(),
            "\
[1] Background
    100     Running     cat
    101     Running     wc -l
[2] Foreground
    200     Stopped     sleep 100
"
        );
    }
}
