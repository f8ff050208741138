use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::ShellError;

/// One stage of a pipeline: the program to run and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub arguments: Vec<String>,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.program)?;
        for arg in &self.arguments {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// The parsed form of one input line: commands joined by pipes, optional
/// redirections on the outer stages, and the trailing `&` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub background: bool,
}

pub fn parse_command_line(input: &str) -> Result<Pipeline, ShellError> {
    let tokens = tokenize(input)?;
    parse_tokens(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Pipe,
    RedirectIn,
    RedirectOut,
    Background,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ShellError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            ' ' | '\t' if !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
            }
            '|' if !in_single && !in_double => {
                if chars.peek() == Some(&'|') {
                    return Err(ShellError::Parse("unexpected '||'".to_string()));
                }
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
                tokens.push(Token::Pipe);
            }
            '&' if !in_single && !in_double => {
                if chars.peek() == Some(&'&') {
                    return Err(ShellError::Parse("unexpected '&&'".to_string()));
                }
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
                tokens.push(Token::Background);
            }
            '>' if !in_single && !in_double => {
                if chars.peek() == Some(&'>') {
                    return Err(ShellError::Parse(
                        "append redirection is not supported".to_string(),
                    ));
                }
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
                tokens.push(Token::RedirectOut);
            }
            '<' if !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                }
                tokens.push(Token::RedirectIn);
            }
            _ => current.push(ch),
        }
    }

    if in_single || in_double {
        return Err(ShellError::Parse("unterminated quote".to_string()));
    }
    if !current.is_empty() {
        tokens.push(Token::Word(current));
    }

    Ok(tokens)
}

fn parse_tokens(tokens: Vec<Token>) -> Result<Pipeline, ShellError> {
    let mut commands: Vec<Command> = Vec::new();
    let mut argv: Vec<String> = Vec::new();
    let mut input: Option<String> = None;
    let mut output: Option<String> = None;
    let mut background = false;

    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        if background {
            return Err(ShellError::Parse("'&' must come last".to_string()));
        }
        match token {
            Token::Word(word) => argv.push(word),
            Token::Pipe => {
                if output.is_some() {
                    return Err(ShellError::Parse(
                        "output redirection is only allowed on the last command".to_string(),
                    ));
                }
                commands.push(take_command(&mut argv)?);
            }
            Token::RedirectIn => {
                if input.is_some() {
                    return Err(ShellError::Parse("duplicate input redirection".to_string()));
                }
                if !commands.is_empty() {
                    return Err(ShellError::Parse(
                        "input redirection is only allowed on the first command".to_string(),
                    ));
                }
                input = Some(redirect_target(&mut iter, "input")?);
            }
            Token::RedirectOut => {
                if output.is_some() {
                    return Err(ShellError::Parse(
                        "duplicate output redirection".to_string(),
                    ));
                }
                output = Some(redirect_target(&mut iter, "output")?);
            }
            Token::Background => background = true,
        }
    }
    commands.push(take_command(&mut argv)?);

    Ok(Pipeline {
        commands,
        input,
        output,
        background,
    })
}

fn take_command(argv: &mut Vec<String>) -> Result<Command, ShellError> {
    if argv.is_empty() {
        return Err(ShellError::Parse("empty command".to_string()));
    }
    let mut words = std::mem::take(argv).into_iter();
    let program = words.next().unwrap();
    Ok(Command {
        program,
        arguments: words.collect(),
    })
}

fn redirect_target(
    iter: &mut std::vec::IntoIter<Token>,
    kind: &str,
) -> Result<String, ShellError> {
    match iter.next() {
        Some(Token::Word(file)) => Ok(expand_tilde(&file)),
        _ => Err(ShellError::Parse(format!(
            "{} redirection: expected filename",
            kind
        ))),
    }
}

fn expand_tilde(input: &str) -> String {
    let home = match std::env::var("HOME") {
        Ok(h) => h,
        Err(_) => return input.to_string(),
    };

    if input == "~" {
        home
    } else if let Some(rest) = input.strip_prefix("~/") {
        format!("{}/{}", home, rest)
    } else {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Pipeline {
        parse_command_line(line).expect("line should parse")
    }

    fn parse_err(line: &str) -> String {
        parse_command_line(line).unwrap_err().to_string()
    }

    #[test]
    fn simple_command_with_arguments() {
        let p = parse("echo hello world");
        assert_eq!(p.commands.len(), 1);
        assert_eq!(p.commands[0].program, "echo");
        assert_eq!(p.commands[0].arguments, vec!["hello", "world"]);
        assert!(p.input.is_none());
        assert!(p.output.is_none());
        assert!(!p.background);
    }

    #[test]
    fn quoted_words_keep_spaces_and_operators() {
        let p = parse("printf 'a b | c' \"d & e\"");
        assert_eq!(p.commands[0].arguments, vec!["a b | c", "d & e"]);
    }

    #[test]
    fn three_stage_pipeline() {
        let p = parse("cat notes.txt | sort -r | uniq");
        let programs: Vec<&str> = p.commands.iter().map(|c| c.program.as_str()).collect();
        assert_eq!(programs, vec!["cat", "sort", "uniq"]);
        assert_eq!(p.commands[1].arguments, vec!["-r"]);
    }

    #[test]
    fn redirections_on_outer_stages() {
        let p = parse("tr a-z A-Z < in.txt > out.txt");
        assert_eq!(p.input.as_deref(), Some("in.txt"));
        assert_eq!(p.output.as_deref(), Some("out.txt"));

        let p = parse("cat < in.txt | wc -l > out.txt");
        assert_eq!(p.commands.len(), 2);
        assert_eq!(p.input.as_deref(), Some("in.txt"));
        assert_eq!(p.output.as_deref(), Some("out.txt"));
    }

    #[test]
    fn background_flag() {
        let p = parse("sleep 100 &");
        assert!(p.background);
        assert_eq!(p.commands[0].program, "sleep");

        assert!(!parse("sleep 100").background);
    }

    #[test]
    fn command_display_round_trips_argv() {
        let p = parse("grep -n main src/main.rs");
        assert_eq!(p.commands[0].to_string(), "grep -n main src/main.rs");
    }

    #[test]
    fn rejects_empty_stages() {
        assert_eq!(parse_err(""), "empty command");
        assert_eq!(parse_err("|"), "empty command");
        assert_eq!(parse_err("ls |"), "empty command");
        assert_eq!(parse_err("| ls"), "empty command");
    }

    #[test]
    fn rejects_misplaced_background() {
        assert_eq!(parse_err("sleep 1 & echo hi"), "'&' must come last");
    }

    #[test]
    fn rejects_unsupported_operators() {
        assert_eq!(parse_err("a && b"), "unexpected '&&'");
        assert_eq!(parse_err("a || b"), "unexpected '||'");
        assert_eq!(parse_err("a >> f"), "append redirection is not supported");
    }

    #[test]
    fn rejects_bad_redirections() {
        assert_eq!(parse_err("cat <"), "input redirection: expected filename");
        assert_eq!(parse_err("cat >"), "output redirection: expected filename");
        assert_eq!(
            parse_err("a | b < in.txt"),
            "input redirection is only allowed on the first command"
        );
        assert_eq!(
            parse_err("a > out.txt | b"),
            "output redirection is only allowed on the last command"
        );
        assert_eq!(
            parse_err("a < x < y"),
            "duplicate input redirection"
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert_eq!(parse_err("echo 'oops"), "unterminated quote");
    }

    #[test]
    fn tilde_expansion_on_redirect_paths() {
        unsafe { std::env::set_var("HOME", "/home/crab") };
        let p = parse("sort < ~/in.txt > ~/out.txt");
        assert_eq!(p.input.as_deref(), Some("/home/crab/in.txt"));
        assert_eq!(p.output.as_deref(), Some("/home/crab/out.txt"));
    }
}
