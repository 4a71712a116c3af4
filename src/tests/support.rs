//! Scratch-tree fixtures for the document and execution tests.

use crate::config::Config;
use crate::plan::Plan;
use crate::suite::Suite;

use std::path::PathBuf;

pub struct Fixture {
    // keeps the scratch tree alive for the duration of the test
    _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub plan_path: PathBuf,
}

/// A minimal unit with every required key present; tests override fields
/// through the returned value.
pub fn unit(name: &str, target: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "target": target,
        "is_shell_command": false,
        "shell_definition": "sh",
        "force_pty": false,
        "set_working_directory": false,
        "rectify": false,
        "rectifier": "",
        "active": true,
        "required": true,
        "set_user_context": false,
        "supply_environment": false,
        "environment": ""
    })
}

pub fn shell_unit(name: &str, target: &str) -> serde_json::Value {
    let mut unit = unit(name, target);
    unit["is_shell_command"] = serde_json::json!(true);
    unit
}

pub fn plan_of(names: &[&str]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = names
        .iter()
        .map(|name| serde_json::json!({ "name": name }))
        .collect();
    serde_json::json!({ "plan": entries })
}

pub fn fixture(units: &[serde_json::Value], plan: serde_json::Value) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();

    std::fs::create_dir(root.join("units")).unwrap();
    std::fs::write(
        root.join("units").join("main.units"),
        serde_json::json!({ "units": units }).to_string(),
    )
    .unwrap();

    std::fs::write(
        root.join("shells.json"),
        serde_json::json!({
            "shells": [
                { "name": "sh", "path": "/bin/sh", "execution_arg": "-c", "source_cmd": "." }
            ]
        })
        .to_string(),
    )
    .unwrap();

    std::fs::write(
        root.join("config.json"),
        serde_json::json!({
            "config": {
                "project_root": root.to_str().unwrap(),
                "units_path": "units",
                "logs_path": "logs",
                "shells_path": "shells.json"
            }
        })
        .to_string(),
    )
    .unwrap();

    std::fs::write(root.join("plan.json"), plan.to_string()).unwrap();

    Fixture {
        config_path: root.join("config.json"),
        plan_path: root.join("plan.json"),
        root,
        _dir: dir,
    }
}

/// Load and bind everything the way main() does.
pub fn load_all(fixture: &Fixture) -> (Config, Plan) {
    let config = Config::load(&fixture.config_path).unwrap();
    let suite = Suite::load(config.units_path()).unwrap();
    let mut plan = Plan::load(&fixture.plan_path).unwrap();
    plan.bind_definitions(&suite, &config).unwrap();
    (config, plan)
}

/// Contents of the newest log file for a task and stream ("stdout"/"stderr").
pub fn read_log(config: &Config, task: &str, stream: &str) -> String {
    let dir = config.logs_path().join(task);
    let suffix = format!(".{stream}.log");
    let mut logs: Vec<PathBuf> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix))
        })
        .collect();
    logs.sort();
    std::fs::read_to_string(logs.last().expect("no log file written")).unwrap()
}
