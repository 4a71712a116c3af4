//! Builds the final argv for a unit's target (or rectifier) without
//! spawning anything.

use crate::config::{expand_vars, Shell};

use std::ffi::CString;
use std::path::Path;

#[derive(Debug)]
pub enum ShapeError {
    MissingShell(String),
    UnparsableCommand(String),
    EmptyCommand(String),
    BadToken(String),
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::MissingShell(command) => {
                format!("Shell command has no shell definition: {command}")
            }
            Self::UnparsableCommand(command) => {
                format!("Could not split command line: {command}")
            }
            Self::EmptyCommand(command) => {
                format!("Command line split to an empty argv: {command:?}")
            }
            Self::BadToken(token) => {
                format!("Command token contains a NUL byte: {token:?}")
            }
        };
        fmt.write_str(msg.as_str())
    }
}

/// Shape a command string into an argv list.
///
/// Direct targets get one `$VAR`/`${VAR}` expansion pass against the current
/// environment and POSIX word splitting. Shell targets exec the shell with
/// its execution arg and the command as a single word; when an environment
/// file is supplied the sourcing subcommand is folded into that word.
pub fn shape(
    command: &str,
    is_shell_command: bool,
    shell: Option<&Shell>,
    supply_environment: bool,
    environment_file: Option<&Path>,
) -> Result<Vec<CString>, ShapeError> {
    let words = if is_shell_command {
        let shell = shell.ok_or_else(|| ShapeError::MissingShell(command.to_string()))?;

        let mut words = vec![shell.path.clone()];
        if !shell.execution_arg.is_empty() {
            words.push(shell.execution_arg.clone());
        }
        let inline = match (supply_environment, environment_file) {
            (true, Some(env_file)) => {
                format!("{} {} && {}", shell.source_cmd, env_file.display(), command)
            }
            _ => command.to_string(),
        };
        words.push(inline);
        words
    } else {
        let expanded = expand_vars(command);
        let words = shlex::split(&expanded)
            .ok_or_else(|| ShapeError::UnparsableCommand(command.to_string()))?;
        if words.is_empty() {
            return Err(ShapeError::EmptyCommand(command.to_string()));
        }
        words
    };

    words
        .into_iter()
        .map(|word| CString::new(word.clone()).map_err(|_| ShapeError::BadToken(word)))
        .collect()
}
