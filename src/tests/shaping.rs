use crate::config::{expand_vars, Shell};
use crate::exec::{shape, ShapeError};

use std::ffi::CString;
use std::path::Path;

fn sh() -> Shell {
    Shell {
        name: "sh".to_string(),
        path: "/bin/sh".to_string(),
        execution_arg: "-c".to_string(),
        source_cmd: ".".to_string(),
    }
}

fn words(argv: &[CString]) -> Vec<&str> {
    argv.iter().map(|w| w.to_str().unwrap()).collect()
}

#[test]
fn direct_command_splits_into_words() {
    let argv = shape("/bin/echo hello world", false, None, false, None).unwrap();
    assert_eq!(words(&argv), ["/bin/echo", "hello", "world"]);
}

#[test]
fn direct_command_honors_quoting() {
    let argv = shape("/bin/echo 'hello world'", false, None, false, None).unwrap();
    assert_eq!(words(&argv), ["/bin/echo", "hello world"]);
}

#[test]
fn direct_command_expands_variables() {
    std::env::set_var("REX_TEST_SHAPE_DIR", "/opt/rex");
    let argv = shape("$REX_TEST_SHAPE_DIR/bin/tool --flag", false, None, false, None).unwrap();
    assert_eq!(words(&argv), ["/opt/rex/bin/tool", "--flag"]);
}

#[test]
fn direct_command_unset_variable_expands_to_nothing() {
    std::env::remove_var("REX_TEST_SHAPE_UNSET");
    let argv = shape("/bin/echo a${REX_TEST_SHAPE_UNSET}b", false, None, false, None).unwrap();
    assert_eq!(words(&argv), ["/bin/echo", "ab"]);
}

#[test]
fn empty_direct_command_is_an_error() {
    assert!(matches!(
        shape("", false, None, false, None),
        Err(ShapeError::EmptyCommand(_))
    ));
}

#[test]
fn unbalanced_quote_is_an_error() {
    assert!(matches!(
        shape("/bin/echo 'oops", false, None, false, None),
        Err(ShapeError::UnparsableCommand(_))
    ));
}

#[test]
fn shell_command_wraps_through_the_shell() {
    let shell = sh();
    let argv = shape("echo hi && echo ho", true, Some(&shell), false, None).unwrap();
    assert_eq!(words(&argv), ["/bin/sh", "-c", "echo hi && echo ho"]);
}

#[test]
fn shell_command_with_environment_sources_the_file_first() {
    let shell = sh();
    let argv = shape(
        "echo $VALUE",
        true,
        Some(&shell),
        true,
        Some(Path::new("/etc/rex/vars.env")),
    )
    .unwrap();
    assert_eq!(
        words(&argv),
        ["/bin/sh", "-c", ". /etc/rex/vars.env && echo $VALUE"]
    );
}

#[test]
fn shell_without_execution_arg_omits_the_token() {
    let shell = Shell {
        name: "plain".to_string(),
        path: "/bin/plainsh".to_string(),
        execution_arg: String::new(),
        source_cmd: "source".to_string(),
    };
    let argv = shape("echo hi", true, Some(&shell), false, None).unwrap();
    assert_eq!(words(&argv), ["/bin/plainsh", "echo hi"]);
}

#[test]
fn shell_command_without_definition_is_an_error() {
    assert!(matches!(
        shape("echo hi", true, None, false, None),
        Err(ShapeError::MissingShell(_))
    ));
}

#[test]
fn expand_vars_handles_braced_and_bare_references() {
    std::env::set_var("REX_TEST_EXPAND", "value");
    assert_eq!(expand_vars("${REX_TEST_EXPAND}"), "value");
    assert_eq!(expand_vars("$REX_TEST_EXPAND"), "value");
    assert_eq!(expand_vars("pre-${REX_TEST_EXPAND}-post"), "pre-value-post");
    assert_eq!(expand_vars("a$REX_TEST_EXPAND/b"), "avalue/b");
}

#[test]
fn expand_vars_leaves_plain_text_and_lone_dollars_alone() {
    assert_eq!(expand_vars("no references here"), "no references here");
    assert_eq!(expand_vars("cost: 5$"), "cost: 5$");
    assert_eq!(expand_vars("$ alone"), "$ alone");
}

#[test]
fn expand_vars_keeps_unterminated_braces_literal() {
    assert_eq!(expand_vars("${NEVER_CLOSED"), "${NEVER_CLOSED");
}
