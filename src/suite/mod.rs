//! Unit definitions and the suite that collects them.
//!
//! A unit describes one way to run a command: identity, shell, environment,
//! rectification policy, required flag, working-directory override. A suite
//! is the library of all actionable units, loaded from a single file or from
//! every `*.units` file in a directory.

use log::{debug, info, warn};
use serde::Deserialize;

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum SuiteError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    EnvironmentWithoutShell(String),
    EmptyRectifier(String),
    CurrentIdentity(String),
}

impl std::fmt::Display for SuiteError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::Io(path, e) => format!("Unable to read unit file: '{}': {e}", path.display()),
            Self::Parse(path, e) => format!("Parsing error in unit file '{}': {e}", path.display()),
            Self::EnvironmentWithoutShell(name) => format!(
                "Unit '{name}' supplies an environment file but is not a shell command"
            ),
            Self::EmptyRectifier(name) => {
                format!("Unit '{name}' enables rectification but its rectifier is empty")
            }
            Self::CurrentIdentity(e) => {
                format!("Could not resolve the current user/group for unit defaults: {e}")
            }
        };
        fmt.write_str(msg.as_str())
    }
}

/// Declarative description of how to execute one command. Immutable once it
/// enters the suite.
#[derive(Clone, Debug, Deserialize)]
pub struct Unit {
    pub name: String,
    pub target: String,
    pub is_shell_command: bool,
    pub shell_definition: String,
    pub force_pty: bool,
    pub set_working_directory: bool,
    #[serde(default)]
    pub working_directory: Option<String>,
    pub rectify: bool,
    pub rectifier: String,
    pub active: bool,
    pub required: bool,
    pub set_user_context: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    pub supply_environment: bool,
    #[serde(rename = "environment")]
    pub environment_file: String,
}

#[derive(Debug, Deserialize)]
struct UnitsDocument {
    units: Vec<Unit>,
}

/// The library of named units a plan draws from.
pub struct Suite {
    units: Vec<Unit>,
}

impl Suite {
    /// Load from a single file, or from every `*.units` file (non-recursive,
    /// hidden files skipped) when `units_path` is a directory.
    pub fn load(units_path: &Path) -> Result<Self, SuiteError> {
        let mut unit_files = Vec::new();
        if units_path.is_dir() {
            let entries = std::fs::read_dir(units_path)
                .map_err(|e| SuiteError::Io(units_path.to_path_buf(), e))?;
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry in {}: {e}", units_path.display());
                        continue;
                    }
                };
                let path = entry.path();
                let hidden = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
                if hidden || !path.is_file() {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) == Some("units") {
                    unit_files.push(path);
                }
            }
            // readdir order is arbitrary, keep loads reproducible
            unit_files.sort();
        } else {
            unit_files.push(units_path.to_path_buf());
        }

        info!("Unit files found: {}", unit_files.len());

        let (current_user, current_group) = current_identity()?;

        let mut units = Vec::new();
        for file in &unit_files {
            let raw = std::fs::read_to_string(file)
                .map_err(|e| SuiteError::Io(file.clone(), e))?;
            let document: UnitsDocument =
                serde_json::from_str(&raw).map_err(|e| SuiteError::Parse(file.clone(), e))?;

            for mut unit in document.units {
                if !unit.active {
                    debug!("Dropping inactive unit '{}'", unit.name);
                    continue;
                }
                if unit.supply_environment && !unit.is_shell_command {
                    return Err(SuiteError::EnvironmentWithoutShell(unit.name));
                }
                if unit.rectify && unit.rectifier.trim().is_empty() {
                    return Err(SuiteError::EmptyRectifier(unit.name));
                }
                if unit.user.is_none() {
                    unit.user = Some(current_user.clone());
                }
                if unit.group.is_none() {
                    unit.group = Some(current_group.clone());
                }
                info!("Added unit \"{}\" to suite", unit.name);
                units.push(unit);
            }
        }

        Ok(Self { units })
    }

    /// Linear lookup by name, first match wins.
    pub fn unit_by_name(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|unit| unit.name == name)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// User and primary group names of the invoking process, used as defaults
/// for units that switch identity without naming one.
fn current_identity() -> Result<(String, String), SuiteError> {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid())
        .map_err(|e| SuiteError::CurrentIdentity(e.to_string()))?
        .ok_or_else(|| SuiteError::CurrentIdentity("no passwd entry for current uid".into()))?;
    let group = nix::unistd::Group::from_gid(nix::unistd::getgid())
        .map_err(|e| SuiteError::CurrentIdentity(e.to_string()))?
        .ok_or_else(|| SuiteError::CurrentIdentity("no group entry for current gid".into()))?;
    Ok((user.name, group.name))
}
