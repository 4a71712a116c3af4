//! The plan: an ordered sequence of tasks, executed in declaration order,
//! gated on dependency completion.

mod task;

pub use task::{Task, TaskError};

use crate::config::Config;
use crate::suite::Suite;

use log::{error, info};
use serde::Deserialize;

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum PlanError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, serde_json::Error),
    UnknownUnit {
        task: String,
    },
    UnknownDependency {
        task: String,
        dependency: String,
    },
    UnknownShell {
        task: String,
        shell: String,
    },
    MissingDependency(String),
    TaskFailed {
        task: String,
        cause: TaskError,
    },
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::Io(path, e) => format!("Unable to read plan file: '{}': {e}", path.display()),
            Self::Parse(path, e) => {
                format!("Parsing error in plan file '{}': {e}", path.display())
            }
            Self::UnknownUnit { task } => {
                format!("Unit name \"{task}\" was referenced in the plan but not defined")
            }
            Self::UnknownDependency { task, dependency } => format!(
                "Task \"{task}\" depends on \"{dependency}\" which is not a task in this plan"
            ),
            Self::UnknownShell { task, shell } => {
                format!("Task \"{task}\" references undefined shell \"{shell}\"")
            }
            Self::MissingDependency(task) => format!(
                "Task \"{task}\" was specified in the plan but not executed due to missing dependencies"
            ),
            Self::TaskFailed { task, cause } => {
                format!("Could not execute task \"{task}\": {cause}")
            }
        };
        fmt.write_str(msg.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    plan: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    name: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Ordered task list plus the driver that walks it.
pub struct Plan {
    tasks: Vec<Task>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| PlanError::Io(path.to_path_buf(), e))?;
        let document: PlanDocument =
            serde_json::from_str(&raw).map_err(|e| PlanError::Parse(path.to_path_buf(), e))?;

        let mut tasks = Vec::new();
        for entry in document.plan {
            // empty dependency strings are noise, not references
            let dependencies: Vec<String> = entry
                .dependencies
                .into_iter()
                .filter(|dep| !dep.is_empty())
                .collect();
            for dep in &dependencies {
                info!(
                    "Added dependency \"{dep}\" to task \"{}\"",
                    entry.name
                );
            }
            info!("Added task \"{}\" to plan", entry.name);
            tasks.push(Task::new(entry.name, dependencies));
        }

        Ok(Self { tasks })
    }

    /// Bind every task to its same-named unit from the suite and validate
    /// the plan's structure. All failures here are load-time errors; the
    /// driver never runs.
    pub fn bind_definitions(
        &mut self,
        suite: &Suite,
        config: &Config,
    ) -> Result<(), PlanError> {
        let task_names: Vec<String> =
            self.tasks.iter().map(|t| t.name().to_string()).collect();

        for task in &mut self.tasks {
            let unit = suite
                .unit_by_name(task.name())
                .ok_or_else(|| PlanError::UnknownUnit {
                    task: task.name().to_string(),
                })?;

            if unit.is_shell_command && config.shell_by_name(&unit.shell_definition).is_err() {
                return Err(PlanError::UnknownShell {
                    task: task.name().to_string(),
                    shell: unit.shell_definition.clone(),
                });
            }

            for dep in task.dependencies() {
                if !task_names.iter().any(|name| name == dep) {
                    return Err(PlanError::UnknownDependency {
                        task: task.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }

            task.bind_definition(unit.clone());
        }
        Ok(())
    }

    /// Walk the tasks in declaration order. A task only runs once every one
    /// of its dependencies is complete; an incomplete dependency is terminal
    /// for the whole plan, never a silent skip.
    pub fn execute(&mut self, config: &Config) -> Result<(), PlanError> {
        for index in 0..self.tasks.len() {
            let name = self.tasks[index].name().to_string();

            let mut dependencies_met = true;
            for dep in self.tasks[index].dependencies().to_vec() {
                match self.tasks.iter().find(|t| t.name() == dep) {
                    Some(dep_task) => {
                        if !dep_task.is_complete() {
                            dependencies_met = false;
                        }
                    }
                    // bind_definitions already refused unresolvable names;
                    // reaching this is a fatal plan error
                    None => {
                        return Err(PlanError::UnknownDependency {
                            task: name,
                            dependency: dep,
                        })
                    }
                }
            }

            if !dependencies_met {
                error!(
                    "[ '{name}' ] This task was specified in the plan but not executed due to missing dependencies. Please revise your plan."
                );
                return Err(PlanError::MissingDependency(name));
            }

            info!("[ '{name}' ] Executing...");
            if let Err(cause) = self.tasks[index].execute(config) {
                error!("[ '{name}' ] Report: {cause}");
                return Err(PlanError::TaskFailed { task: name, cause });
            }
        }
        Ok(())
    }

    pub fn task_by_name(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name() == name)
    }
}
