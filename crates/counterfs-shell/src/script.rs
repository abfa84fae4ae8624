// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Line-oriented command language read by the shell

use anyhow::{bail, Result};

/// One shell command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read a counter file through a single open session
    Cat { path: String },
    /// Store `value` in a counter file, creating it when missing
    Write { path: String, value: String },
    /// Create a counter file when missing
    Touch { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// List a directory (the root when no path is given)
    Ls { path: Option<String> },
    /// Print node attributes
    Stat { path: String },
    /// Print the whole namespace
    Tree,
    /// Print filesystem statistics
    Statfs,
}

/// Parse one script line. Blank lines and `#` comments yield `None`.
///
/// `write` takes the remainder of the line after the path as its value, so
/// `write /c 12 apples` stores the text `12 apples`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (verb, rest) = split_word(line);
    let command = match verb {
        "cat" => Command::Cat { path: one_path(verb, rest)? },
        "touch" => Command::Touch { path: one_path(verb, rest)? },
        "mkdir" => Command::Mkdir { path: one_path(verb, rest)? },
        "stat" => Command::Stat { path: one_path(verb, rest)? },
        "ls" => {
            let path = match rest {
                "" => None,
                _ => Some(one_path(verb, rest)?),
            };
            Command::Ls { path }
        }
        "write" => {
            let (path, value) = split_word(rest);
            if path.is_empty() || value.is_empty() {
                bail!("usage: write PATH VALUE");
            }
            Command::Write {
                path: path.to_string(),
                value: value.to_string(),
            }
        }
        "tree" => no_args(verb, rest, Command::Tree)?,
        "statfs" => no_args(verb, rest, Command::Statfs)?,
        other => bail!("unknown command: {other}"),
    };
    Ok(Some(command))
}

fn split_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (text, ""),
    }
}

fn one_path(verb: &str, rest: &str) -> Result<String> {
    let (path, extra) = split_word(rest);
    if path.is_empty() || !extra.is_empty() {
        bail!("usage: {verb} PATH");
    }
    Ok(path.to_string())
}

fn no_args(verb: &str, rest: &str, command: Command) -> Result<Command> {
    if !rest.is_empty() {
        bail!("{verb} takes no arguments");
    }
    Ok(command)
}
