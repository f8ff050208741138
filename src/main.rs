mod builtins;
mod config;
mod diagnostics;
mod error;
mod exec;
mod jobs;
mod parser;
mod repl;
mod shell;
mod shell_config;
mod signals;

use crate::repl::run_repl;

fn main() {
    let result = signals::install()
        .and_then(|_| signals::init_terminal())
        .and_then(|_| run_repl());
    if let Err(err) = result {
        eprintln!("reef: {}", err);
        std::process::exit(1);
    }
}
