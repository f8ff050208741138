use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;

use crate::diagnostics;
use crate::error::ShellError;
use crate::jobs::{self, JobState};
use crate::parser::Pipeline;
use crate::signals;

pub enum BuiltinResult {
    Handled,
    NotHandled,
}

/// Matches the leading command of the pipeline against the builtin set and
/// executes it. Anything else falls through to the launcher.
pub fn try_handle_builtin(pipeline: &Pipeline) -> Result<BuiltinResult, ShellError> {
    let command = &pipeline.commands[0];
    let args = command.arguments.as_slice();
    match command.program.as_str() {
        "quit" | "exit" => std::process::exit(0),
        "jobs" => jobs_builtin(args)?,
        "fg" => fg(args)?,
        "bg" => bg(args)?,
        "slay" => signal_process(args, Signal::SIGKILL, "slay")?,
        "halt" => signal_process(args, Signal::SIGSTOP, "halt")?,
        "cont" => signal_process(args, Signal::SIGCONT, "cont")?,
        _ => return Ok(BuiltinResult::NotHandled),
    }
    Ok(BuiltinResult::Handled)
}

fn jobs_builtin(args: &[String]) -> Result<(), ShellError> {
    if !args.is_empty() {
        return Err(usage("jobs", "Usage: jobs."));
    }
    print!("{}", jobs::with_table(|table| table.render()));
    Ok(())
}

/// Resumes a job, promotes it to the foreground, hands it the terminal, and
/// parks the REPL until it stops or terminates.
fn fg(args: &[String]) -> Result<(), ShellError> {
    let num = parse_job_number(args, "fg", "Usage: fg <jobid>.")?;
    if !jobs::with_table(|table| table.contains_job(num)) {
        return Err(ShellError::NoSuchJob(num));
    }
    let gid = jobs::with_table(|table| table.job_by_num(num).map(|job| job.gid))?;
    killpg(gid, Signal::SIGCONT)?;
    jobs::with_table(|table| table.set_job_state(num, JobState::Foreground))?;
    if let Err(err) = signals::give_terminal_to(gid) {
        diagnostics::print_error(&err);
    }
    signals::wait_for_foreground();
    Ok(())
}

/// Resumes a job and leaves it in the background.
fn bg(args: &[String]) -> Result<(), ShellError> {
    let num = parse_job_number(args, "bg", "Usage: bg <jobid>.")?;
    let gid = jobs::with_table(|table| table.job_by_num(num).map(|job| job.gid))?;
    killpg(gid, Signal::SIGCONT)?;
    jobs::with_table(|table| table.set_job_state(num, JobState::Background))?;
    Ok(())
}

/// `slay`/`halt`/`cont`: one argument names a pid, two name a job and a
/// 0-based process index within it.
fn signal_process(args: &[String], signal: Signal, command: &'static str) -> Result<(), ShellError> {
    let pid = match parse_target(args, command)? {
        Target::Process(raw) => {
            let pid = Pid::from_raw(raw);
            jobs::with_table(|table| table.job_by_pid(pid).map(|_| ()))?;
            pid
        }
        Target::Member { job, index } => jobs::with_table(|table| {
            let job_ref = table.job_by_num(job)?;
            job_ref
                .processes
                .get(index)
                .map(|p| p.pid)
                .ok_or(ShellError::NoSuchIndex { job, index })
        })?,
    };
    kill(pid, signal)?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Target {
    Process(i32),
    Member { job: u32, index: usize },
}

fn parse_job_number(
    args: &[String],
    command: &'static str,
    message: &str,
) -> Result<u32, ShellError> {
    match args {
        [num] => match num.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(usage(command, message)),
        },
        _ => Err(usage(command, message)),
    }
}

fn parse_target(args: &[String], command: &'static str) -> Result<Target, ShellError> {
    let message = format!(
        "Usage: {c} <pid> | {c} <jobid> <index>.",
        c = command
    );
    match args {
        [pid] => match pid.parse::<i32>() {
            Ok(raw) if raw > 0 => Ok(Target::Process(raw)),
            _ => Err(usage(command, &message)),
        },
        [job, index] => {
            let job = match job.parse::<u32>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(usage(command, &message)),
            };
            let index = index
                .parse::<usize>()
                .map_err(|_| usage(command, &message))?;
            Ok(Target::Member { job, index })
        }
        _ => Err(usage(command, &message)),
    }
}

fn usage(command: &'static str, message: &str) -> ShellError {
    ShellError::Usage {
        command: command.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn job_number_accepts_one_positive_integer() {
        let args = words(&["3"]);
        assert_eq!(parse_job_number(&args, "fg", "Usage: fg <jobid>.").unwrap(), 3);
    }

    #[test]
    fn job_number_rejects_everything_else() {
        for bad in [&[][..], &["0"][..], &["-2"][..], &["two"][..], &["1", "2"][..]] {
            let args = words(bad);
            let err = parse_job_number(&args, "fg", "Usage: fg <jobid>.").unwrap_err();
            assert_eq!(err.to_string(), "Usage: fg <jobid>.");
        }
    }

    #[test]
    fn target_single_argument_is_a_pid() {
        let args = words(&["4242"]);
        assert_eq!(parse_target(&args, "slay").unwrap(), Target::Process(4242));
    }

    #[test]
    fn target_two_arguments_are_job_and_index() {
        let args = words(&["2", "0"]);
        assert_eq!(
            parse_target(&args, "halt").unwrap(),
            Target::Member { job: 2, index: 0 }
        );
    }

    #[test]
    fn target_rejects_malformed_forms() {
        for bad in [
            &[][..],
            &["0"][..],
            &["-5"][..],
            &["abc"][..],
            &["1", "x"][..],
            &["0", "1"][..],
            &["1", "2", "3"][..],
        ] {
            let args = words(bad);
            let err = parse_target(&args, "cont").unwrap_err();
            assert_eq!(err.to_string(), "Usage: cont <pid> | cont <jobid> <index>.");
        }
    }
}
