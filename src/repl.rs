use std::env;

use colored::Colorize;
use nix::unistd;
use rustyline::Editor;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;

use crate::config;
use crate::diagnostics;
use crate::error::ShellError;
use crate::shell::Shell;
use crate::shell_config::ShellConfig;

pub fn run_repl() -> Result<(), ShellError> {
    let mut rl = Editor::<(), DefaultHistory>::new()
        .map_err(|e| ShellError::LineEditor(e.to_string()))?;
    rl.set_history_ignore_space(true);
    let _ = rl.set_history_ignore_dups(true);

    let shell_config = ShellConfig::load();
    if !shell_config.color {
        colored::control::set_override(false);
    }
    let mut shell = Shell::new();

    let history_path = config::history_file();
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline(&generate_prompt(&shell_config)) {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();
                if let Err(e) = shell.run_line(&line) {
                    diagnostics::print_error(&e);
                    // A child that fell back into the loop must never read
                    // another line from the terminal.
                    if unistd::getpid() != shell.pid {
                        std::process::exit(1);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => return Err(ShellError::LineEditor(e.to_string())),
        }
    }

    if let Some(path) = &history_path {
        let _ = rl.save_history(path);
    }

    Ok(())
}

fn generate_prompt(config: &ShellConfig) -> String {
    if let Some(format) = &config.prompt_format {
        let mut result = format.clone();
        result = result.replace("%u", &env::var("USER").unwrap_or_else(|_| "user".to_string()));
        result = result.replace("%h", &hostname().unwrap_or_else(|| "host".to_string()));
        result = result.replace("%d", &current_dir_path().unwrap_or_else(|| "?".to_string()));
        result
    } else {
        let dir = current_dir_path().unwrap_or_else(|| "?".to_string());
        format!(
            "{} {} ",
            dir.truecolor(140, 180, 255),
            "❯".bright_green()
        )
    }
}

fn current_dir_path() -> Option<String> {
    let cwd = env::current_dir().ok()?;
    let path = cwd.to_string_lossy().to_string();
    if let Ok(home) = env::var("HOME") {
        if path == home {
            return Some(String::from("~"));
        }
        if let Some(rest) = path.strip_prefix(&home) {
            return Some(format!("~{}", rest));
        }
    }
    Some(path)
}

fn hostname() -> Option<String> {
    if let Ok(h) = env::var("HOSTNAME") {
        if !h.is_empty() {
            return Some(h);
        }
    }
    match std::fs::read_to_string("/proc/sys/kernel/hostname") {
        Ok(s) => Some(s.trim().to_string()),
        Err(_) => None,
    }
}
