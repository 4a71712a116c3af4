//! End-to-end runs of the decision tree and the launchers against real
//! children.

use super::support::{fixture, load_all, plan_of, read_log, shell_unit, unit};
use crate::exec::{ExecError, LaunchSpec, Launcher, ABNORMAL_EXIT};
use crate::plan::{PlanError, TaskError};

use std::ffi::CString;

#[test]
fn successful_target_marks_the_task_complete() {
    let fx = fixture(&[unit("a", "/bin/true")], plan_of(&["a"]));
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();

    assert!(plan.task_by_name("a").unwrap().is_complete());
    // silent child still produces both log files, empty but present
    assert_eq!(read_log(&config, "a", "stdout"), "");
    assert_eq!(read_log(&config, "a", "stderr"), "");
}

#[test]
fn soft_failure_is_not_a_plan_failure() {
    let mut b = unit("b", "/bin/false");
    b["required"] = serde_json::json!(false);
    let fx = fixture(&[b], plan_of(&["b"]));
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert!(!plan.task_by_name("b").unwrap().is_complete());
}

#[test]
fn required_failure_aborts_the_plan() {
    let fx = fixture(&[unit("c", "/bin/false")], plan_of(&["c"]));
    let (config, mut plan) = load_all(&fx);

    match plan.execute(&config) {
        Err(PlanError::TaskFailed { task, cause }) => {
            assert_eq!(task, "c");
            assert!(matches!(cause, TaskError::Failed(name) if name == "c"));
        }
        other => panic!("expected TaskFailed(c), got {other:?}"),
    }
}

#[test]
fn rectifier_heals_and_the_retry_completes() {
    let fx = fixture(&[unit("d", "/bin/true")], plan_of(&["d"]));

    // the unit needs paths inside the scratch tree, so it is rewritten once
    // the tree exists
    let marker = fx.root.join("rex-marker");
    let mut d = shell_unit("d", &format!("test -f {}", marker.display()));
    d["rectify"] = serde_json::json!(true);
    d["rectifier"] = serde_json::json!(format!("touch {}", marker.display()));
    std::fs::write(
        fx.root.join("units").join("main.units"),
        serde_json::json!({ "units": [d] }).to_string(),
    )
    .unwrap();

    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert!(plan.task_by_name("d").unwrap().is_complete());
    assert!(marker.exists(), "rectifier should have created the marker");
}

#[test]
fn rectifier_that_does_not_heal_is_a_lost_cause() {
    let mut e = unit("e", "/bin/false");
    e["rectify"] = serde_json::json!(true);
    e["rectifier"] = serde_json::json!("/bin/true");
    let fx = fixture(&[e], plan_of(&["e"]));
    let (config, mut plan) = load_all(&fx);

    match plan.execute(&config) {
        Err(PlanError::TaskFailed { task, cause }) => {
            assert_eq!(task, "e");
            assert!(matches!(
                cause,
                TaskError::LostCause(name, reason)
                    if name == "e" && reason == "rectifier did not heal"
            ));
        }
        other => panic!("expected LostCause(e), got {other:?}"),
    }
    assert!(!plan.task_by_name("e").unwrap().is_complete());
}

#[test]
fn failing_rectifier_is_a_lost_cause_of_its_own() {
    let mut f = unit("f", "/bin/false");
    f["rectify"] = serde_json::json!(true);
    f["rectifier"] = serde_json::json!("/bin/false");
    let fx = fixture(&[f], plan_of(&["f"]));
    let (config, mut plan) = load_all(&fx);

    match plan.execute(&config) {
        Err(PlanError::TaskFailed { cause, .. }) => {
            assert!(matches!(
                cause,
                TaskError::LostCause(_, reason) if reason == "rectifier failed"
            ));
        }
        other => panic!("expected LostCause(rectifier failed), got {other:?}"),
    }
}

#[test]
fn failing_rectifier_on_optional_task_moves_on() {
    let mut g = unit("g", "/bin/false");
    g["rectify"] = serde_json::json!(true);
    g["rectifier"] = serde_json::json!("/bin/false");
    g["required"] = serde_json::json!(false);
    let fx = fixture(&[g], plan_of(&["g"]));
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert!(!plan.task_by_name("g").unwrap().is_complete());
}

#[test]
fn stdout_bytes_arrive_in_the_log_in_order() {
    let h = shell_unit("h", "printf 'one\\ntwo\\nthree\\n'");
    let fx = fixture(&[h], plan_of(&["h"]));
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert_eq!(read_log(&config, "h", "stdout"), "one\ntwo\nthree\n");
}

#[test]
fn stderr_is_captured_separately_from_stdout() {
    let k = shell_unit("k", "echo visible && echo hidden 1>&2");
    let fx = fixture(&[k], plan_of(&["k"]));
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert_eq!(read_log(&config, "k", "stdout"), "visible\n");
    assert_eq!(read_log(&config, "k", "stderr"), "hidden\n");
}

#[test]
fn environment_file_is_sourced_before_the_target() {
    let mut m = shell_unit("m", "test \"$REX_E2E_VALUE\" = hello");
    m["supply_environment"] = serde_json::json!(true);
    m["environment"] = serde_json::json!("vars.env");
    let fx = fixture(&[m], plan_of(&["m"]));
    std::fs::write(fx.root.join("vars.env"), "REX_E2E_VALUE=hello\n").unwrap();
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();
    assert!(plan.task_by_name("m").unwrap().is_complete());
}

#[test]
fn working_directory_override_applies_and_persists() {
    let mut n = shell_unit("n", "touch cwd-marker");
    n["set_working_directory"] = serde_json::json!(true);
    n["working_directory"] = serde_json::json!("subdir");
    let fx = fixture(&[n], plan_of(&["n"]));
    std::fs::create_dir(fx.root.join("subdir")).unwrap();
    let (config, mut plan) = load_all(&fx);

    plan.execute(&config).unwrap();

    // the child ran inside the override
    assert!(fx.root.join("subdir").join("cwd-marker").exists());
    // and the runner's working directory deliberately stays changed
    let cwd = std::env::current_dir().unwrap();
    assert_eq!(cwd.canonicalize().unwrap(), fx.root.join("subdir"));
}

#[test]
fn pty_mode_without_a_terminal_fails_cleanly() {
    let mut p = unit("p", "/bin/true");
    p["force_pty"] = serde_json::json!(true);
    let fx = fixture(&[p], plan_of(&["p"]));
    let (config, mut plan) = load_all(&fx);

    let result = plan.execute(&config);
    if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
        // interactive run: the PTY path is fully usable
        result.unwrap();
        assert!(plan.task_by_name("p").unwrap().is_complete());
    } else {
        assert!(matches!(
            result,
            Err(PlanError::TaskFailed {
                cause: TaskError::Exec(ExecError::NotATty(_)),
                ..
            })
        ));
    }
}

fn argv(words: &[&str]) -> Vec<CString> {
    words.iter().map(|w| CString::new(*w).unwrap()).collect()
}

#[test]
fn launcher_reports_the_raw_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let (out_log, err_log) = (dir.path().join("out.log"), dir.path().join("err.log"));
    let argv = argv(&["/bin/sh", "-c", "exit 7"]);
    let spec = LaunchSpec {
        argv: &argv,
        stdout_log: &out_log,
        stderr_log: &err_log,
        identity: None,
        clear_environment: false,
    };

    assert_eq!(Launcher::Pipe.run(&spec).unwrap(), 7);
}

#[test]
fn signal_termination_returns_the_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let (out_log, err_log) = (dir.path().join("out.log"), dir.path().join("err.log"));
    let argv = argv(&["/bin/sh", "-c", "kill -9 $$"]);
    let spec = LaunchSpec {
        argv: &argv,
        stdout_log: &out_log,
        stderr_log: &err_log,
        identity: None,
        clear_environment: false,
    };

    assert_eq!(Launcher::Pipe.run(&spec).unwrap(), ABNORMAL_EXIT);
}

#[test]
fn launcher_refuses_an_empty_argv() {
    let dir = tempfile::tempdir().unwrap();
    let (out_log, err_log) = (dir.path().join("out.log"), dir.path().join("err.log"));
    let spec = LaunchSpec {
        argv: &[],
        stdout_log: &out_log,
        stderr_log: &err_log,
        identity: None,
        clear_environment: false,
    };

    assert!(matches!(
        Launcher::Pipe.run(&spec),
        Err(ExecError::EmptyArgv)
    ));
}

#[test]
fn unresolvable_identity_is_reported_before_exec() {
    // lookup failures surface before any setgid/setuid is attempted
    assert!(matches!(
        crate::platform::switch_identity("no-such-user-xyzzy", "no-such-group-xyzzy"),
        Err(crate::platform::IdentityError::NoSuchUser(_))
    ));
}
