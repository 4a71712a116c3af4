use serde::Deserialize;

/// A named interpreter record consulted when a unit runs as a shell command.
///
/// `execution_arg` is the flag that makes the shell run an inline string
/// (e.g. `-c`), `source_cmd` the built-in that loads an environment file
/// (e.g. `.` or `source`).
#[derive(Clone, Debug, Deserialize)]
pub struct Shell {
    pub name: String,
    pub path: String,
    pub execution_arg: String,
    pub source_cmd: String,
}

#[derive(Debug, Deserialize)]
pub struct ShellsDocument {
    pub shells: Vec<Shell>,
}
