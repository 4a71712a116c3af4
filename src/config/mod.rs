//! The configuration document: project root, document paths and the shell
//! catalogue. Built once at startup, immutable afterwards.

mod interpolate;
mod shells;

pub use interpolate::expand_vars;
pub use shells::Shell;

use shells::ShellsDocument;

use log::debug;
use serde::Deserialize;

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    BadProjectRoot(PathBuf, std::io::Error),
    MissingPath {
        key: &'static str,
        path: PathBuf,
    },
    UnknownShell(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::Io(path, e) => format!("Unable to read file: '{}': {e}", path.display()),
            Self::Parse(path, e) => format!("Parsing error in '{}': {e}", path.display()),
            Self::BadProjectRoot(path, e) => {
                format!("Could not resolve project_root '{}': {e}", path.display())
            }
            Self::MissingPath { key, path } => {
                format!("'{key}' does not exist ('{}')", path.display())
            }
            Self::UnknownShell(name) => format!(
                "The shell specified ('{name}') is not defined in the shell definitions file"
            ),
        };
        fmt.write_str(msg.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    config: ConfigFields,
}

#[derive(Debug, Deserialize)]
struct ConfigFields {
    project_root: String,
    units_path: String,
    logs_path: String,
    shells_path: String,
}

/// Loaded configuration. All paths are absolute after load; `logs_path` is
/// the only one allowed to not exist yet (it is created per task).
#[derive(Debug)]
pub struct Config {
    project_root: PathBuf,
    units_path: PathBuf,
    logs_path: PathBuf,
    shells_path: PathBuf,
    shells: Vec<Shell>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration file: {}", path.display());
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let document: ConfigDocument = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        let fields = document.config;

        // interpolation happens once, before the root is made absolute
        let project_root_raw = PathBuf::from(expand_vars(&fields.project_root));
        let project_root = std::fs::canonicalize(&project_root_raw)
            .map_err(|e| ConfigError::BadProjectRoot(project_root_raw.clone(), e))?;
        debug!("'project_root': {}", project_root.display());

        let units_path = resolve_against(&project_root, &expand_vars(&fields.units_path));
        let logs_path = resolve_against(&project_root, &expand_vars(&fields.logs_path));
        let shells_path = resolve_against(&project_root, &expand_vars(&fields.shells_path));
        debug!("'units_path': {}", units_path.display());
        debug!("'logs_path': {}", logs_path.display());
        debug!("'shells_path': {}", shells_path.display());

        check_path_exists("units_path", &units_path)?;
        check_path_exists("shells_path", &shells_path)?;

        // shells are scoped beyond a single plan so they live with the config
        let shells = load_shells(&shells_path)?;

        debug!("Configuration loaded.");
        Ok(Self {
            project_root,
            units_path,
            logs_path,
            shells_path,
            shells,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn units_path(&self) -> &Path {
        &self.units_path
    }

    pub fn logs_path(&self) -> &Path {
        &self.logs_path
    }

    pub fn shells_path(&self) -> &Path {
        &self.shells_path
    }

    /// Linear lookup in the shell catalogue, first match wins.
    pub fn shell_by_name(&self, name: &str) -> Result<&Shell, ConfigError> {
        self.shells
            .iter()
            .find(|shell| shell.name == name)
            .ok_or_else(|| ConfigError::UnknownShell(name.to_string()))
    }
}

fn resolve_against(project_root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        project_root.join(path)
    }
}

fn check_path_exists(key: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        debug!("'{key}' exists ('{}')", path.display());
        Ok(())
    } else {
        Err(ConfigError::MissingPath {
            key,
            path: path.to_path_buf(),
        })
    }
}

fn load_shells(path: &Path) -> Result<Vec<Shell>, ConfigError> {
    debug!("Loading shells...");
    let raw =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let document: ShellsDocument =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    for shell in &document.shells {
        debug!("Loaded shell: '{}' ({})", shell.name, shell.path);
    }
    Ok(document.shells)
}
