use colored::Colorize;

use crate::error::ShellError;

pub fn print_error(err: &ShellError) {
    eprintln!(
        "{} {}",
        "error:".truecolor(255, 120, 180).bold(),
        err.to_string().truecolor(255, 150, 200)
    );
    if let ShellError::NoSuchJob(_) | ShellError::NoSuchProcess(_) | ShellError::NoSuchIndex { .. } =
        err
    {
        eprintln!(
            "{} {}",
            "help:".truecolor(180, 160, 255),
            "run 'jobs' to list live jobs and their pids".truecolor(180, 160, 255)
        );
    }
}
