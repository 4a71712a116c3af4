//! A plan entry bound to a unit definition. Owns the rectify/required
//! decision tree.

use crate::config::Config;
use crate::exec::{
    shape, ExecError, IdentityContext, LaunchSpec, Launcher, ShapeError,
};
use crate::suite::Unit;

use log::{debug, error, info, warn};

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum TaskError {
    NotBound(String),
    InactiveUnit(String),
    EnvironmentWithoutShell(String),
    UnknownShell { task: String, shell: String },
    LogSetup(PathBuf, std::io::Error),
    WorkingDirectory(PathBuf, std::io::Error),
    Shape(ShapeError),
    Exec(ExecError),
    Failed(String),
    LostCause(String, &'static str),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::NotBound(name) => {
                format!("Attempted to execute task '{name}' before its unit was bound")
            }
            Self::InactiveUnit(name) => {
                format!("Somehow tried to execute task '{name}' with an inactive unit definition")
            }
            Self::EnvironmentWithoutShell(name) => format!(
                "Garbage input on task '{name}': supplied a shell environment file for a non-shell target"
            ),
            Self::UnknownShell { task, shell } => {
                format!("Task '{task}' references undefined shell '{shell}'")
            }
            Self::LogSetup(path, e) => format!(
                "Could not prepare logs for task execution at '{}': {e}",
                path.display()
            ),
            Self::WorkingDirectory(path, e) => format!(
                "Could not set working directory to '{}': {e}",
                path.display()
            ),
            Self::Shape(e) => format!("Could not shape command: {e}"),
            Self::Exec(e) => format!("Launcher error: {e}"),
            Self::Failed(name) => format!("Task failed: {name}"),
            Self::LostCause(name, reason) => {
                format!("Lost cause on task '{name}': {reason}")
            }
        };
        fmt.write_str(msg.as_str())
    }
}

impl From<ShapeError> for TaskError {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<ExecError> for TaskError {
    fn from(e: ExecError) -> Self {
        Self::Exec(e)
    }
}

/// A plan entry: name, dependency list, the bound unit (a value-owned copy
/// taken from the suite) and the completion flag that flips exactly once.
#[derive(Debug)]
pub struct Task {
    name: String,
    dependencies: Vec<String>,
    definition: Option<Unit>,
    complete: bool,
}

impl Task {
    pub fn new(name: String, dependencies: Vec<String>) -> Self {
        Self {
            name,
            dependencies,
            definition: None,
            complete: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn bind_definition(&mut self, unit: Unit) {
        info!(
            "Loaded definition \"{}\" as task in configured plan",
            unit.name
        );
        self.definition = Some(unit);
    }

    fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Run the unit's target through the decision tree.
    ///
    /// Only a zero exit after at most one rectification marks the task
    /// complete. A not-required failure returns `Ok` without completing.
    pub fn execute(&mut self, config: &Config) -> Result<(), TaskError> {
        let unit = match &self.definition {
            Some(unit) => unit.clone(),
            None => return Err(TaskError::NotBound(self.name.clone())),
        };
        let task_name = unit.name.clone();

        debug!("[ '{task_name}' ] Using unit definition \"{task_name}\"");

        if !unit.active {
            return Err(TaskError::InactiveUnit(task_name));
        }
        if unit.supply_environment && !unit.is_shell_command {
            return Err(TaskError::EnvironmentWithoutShell(task_name));
        }

        // relative paths in the definition resolve against project_root; a
        // shell command line is left for the shell itself to resolve
        let root = config.project_root();
        let command = if unit.is_shell_command {
            unit.target.clone()
        } else {
            absolutize_command(&unit.target, root)
        };
        let environment_file = unit
            .supply_environment
            .then(|| absolutize_path(&unit.environment_file, root));

        let shell = if unit.is_shell_command {
            let shell = config.shell_by_name(&unit.shell_definition).map_err(|_| {
                TaskError::UnknownShell {
                    task: task_name.clone(),
                    shell: unit.shell_definition.clone(),
                }
            })?;
            info!("[ '{task_name}' ] Shell: {}", shell.path);
            if let Some(env_file) = &environment_file {
                info!("[ '{task_name}' ] Vars file: {}", env_file.display());
            }
            Some(shell.clone())
        } else {
            None
        };

        // one log pair per invocation; target, rectifier and retry all
        // append to the same two files
        let log_dir = config.logs_path().join(&task_name);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| TaskError::LogSetup(log_dir.clone(), e))?;
        info!("[ '{task_name}' ] Logging will be at '{}'", log_dir.display());

        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H:%M:%S");
        let stdout_log = log_dir.join(format!("{timestamp}.stdout.log"));
        let stderr_log = log_dir.join(format!("{timestamp}.stderr.log"));

        if unit.set_working_directory {
            let new_working_dir =
                absolutize_path(unit.working_directory.as_deref().unwrap_or(""), root);
            info!(
                "[ '{task_name}' ] Setting working directory: {}",
                new_working_dir.display()
            );
            // deliberately not restored afterwards, plan authors are explicit
            std::env::set_current_dir(&new_working_dir)
                .map_err(|e| TaskError::WorkingDirectory(new_working_dir.clone(), e))?;
        }

        let identity = unit.set_user_context.then(|| IdentityContext {
            user: unit.user.clone().unwrap_or_default(),
            group: unit.group.clone().unwrap_or_default(),
        });
        let launcher = Launcher::for_unit(unit.force_pty);

        if !unit.is_shell_command {
            if let Some(word) = command.split_whitespace().next() {
                if which::which(word).is_err() {
                    warn!("[ '{task_name}' ] Target executable '{word}' was not resolvable ahead of launch");
                }
            }
        }

        let launch = |line: &str| -> Result<i32, TaskError> {
            let argv = shape(
                line,
                unit.is_shell_command,
                shell.as_ref(),
                unit.supply_environment,
                environment_file.as_deref(),
            )?;
            let spec = LaunchSpec {
                argv: &argv,
                stdout_log: &stdout_log,
                stderr_log: &stderr_log,
                identity: identity.as_ref(),
                clear_environment: unit.supply_environment,
            };
            Ok(launcher.run(&spec)?)
        };

        info!("[ '{task_name}' ] Executing target: \"{command}\"");
        let target_status = launch(&command)?;

        if target_status == 0 {
            info!("[ '{task_name}' ] Target succeeded. Marking as complete.");
            self.mark_complete();
            return Ok(());
        }

        warn!("[ '{task_name}' ] Target failed with exit code {target_status}.");

        if !unit.rectify {
            if !unit.required {
                info!("[ '{task_name}' ] This task is not required to continue the plan. Moving on.");
                return Ok(());
            }
            error!("[ '{task_name}' ] Task is required, and failed, and rectification is not enabled.");
            return Err(TaskError::Failed(task_name));
        }

        info!("[ '{task_name}' ] Rectification pattern is enabled.");
        let rectifier = if unit.is_shell_command {
            unit.rectifier.clone()
        } else {
            absolutize_command(&unit.rectifier, root)
        };
        info!("[ '{task_name}' ] Executing rectification: \"{rectifier}\"");
        let rectifier_status = launch(&rectifier)?;

        if rectifier_status != 0 {
            warn!("[ '{task_name}' ] Rectification failed with exit code {rectifier_status}.");
            if !unit.required {
                info!("[ '{task_name}' ] This task is not required to continue the plan. Moving on.");
                return Ok(());
            }
            error!("[ '{task_name}' ] Task is required, but failed, and rectification failed. Lost cause.");
            return Err(TaskError::LostCause(task_name, "rectifier failed"));
        }

        info!("[ '{task_name}' ] Rectification returned successfully.");
        info!("[ '{task_name}' ] Re-executing target: \"{command}\"");
        let retry_status = launch(&command)?;

        if retry_status == 0 {
            info!("[ '{task_name}' ] Re-execution was successful. Marking as complete.");
            self.mark_complete();
            return Ok(());
        }

        warn!("[ '{task_name}' ] Re-execution failed with exit code {retry_status}.");
        if !unit.required {
            info!("[ '{task_name}' ] This task is not required to continue the plan. Moving on.");
            return Ok(());
        }
        error!(
            "[ '{task_name}' ] Task is required, and failed, then rectified but the rectifier did not heal the condition causing the target to fail."
        );
        Err(TaskError::LostCause(task_name, "rectifier did not heal"))
    }
}

/// Prefix a relative command with the project root. Only the first
/// whitespace-delimited word decides whether the command is absolute.
fn absolutize_command(command: &str, project_root: &Path) -> String {
    let first_word = command.split(' ').next().unwrap_or(command);
    if first_word.starts_with('/') {
        command.to_string()
    } else {
        format!("{}/{command}", project_root.display())
    }
}

fn absolutize_path(path: &str, project_root: &Path) -> PathBuf {
    if path.starts_with('/') {
        PathBuf::from(path)
    } else {
        project_root.join(path)
    }
}
