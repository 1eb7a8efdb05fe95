use sdk::errors::EngineError;
use sleuth_engine::command_executor::{Executor, ShellExecutor};
use sleuth_engine::config::ExecutorConfig;
use std::time::Duration;

#[tokio::test]
async fn test_safe_command_execution() {
    let executor = ShellExecutor::new();

    let output = executor.run("uname").await.expect("uname should run");
    assert!(output.success);
    assert!(!output.output.trim().is_empty());
}

#[tokio::test]
async fn test_pipeline_and_line_count() {
    let executor = ShellExecutor::new();

    let output = executor
        .run("printf 'sshd\\napache\\nrecidive\\n' | grep -v apache | wc -l")
        .await
        .unwrap();

    assert!(output.success);
    assert_eq!(output.output.trim(), "2");
}

#[tokio::test]
async fn test_non_zero_exit_is_not_an_error() {
    let executor = ShellExecutor::new();

    let output = executor.run("echo 'unit not found' >&2; exit 4").await.unwrap();

    assert!(!output.success);
    assert!(output.output.contains("unit not found"));
}

#[tokio::test]
async fn test_stdout_and_stderr_combined() {
    let executor = ShellExecutor::new();

    let output = executor.run("echo out; echo err >&2").await.unwrap();

    assert!(output.output.contains("out"));
    assert!(output.output.contains("err"));
}

#[tokio::test]
async fn test_timeout_kills_command() {
    let executor = ShellExecutor::new().with_timeout(Duration::from_millis(200));

    let err = executor.run("sleep 5").await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutorTimeout { .. }));
}

#[tokio::test]
async fn test_missing_shell_is_an_error() {
    let config = ExecutorConfig {
        shell: "/nonexistent/shell".to_string(),
        timeout_secs: 5,
    };
    let executor = ShellExecutor::from_config(&config);

    let err = executor.run("echo hi").await.unwrap_err();
    assert!(matches!(err, EngineError::Executor(_)));
}

#[tokio::test]
async fn test_empty_command_rejected() {
    let executor = ShellExecutor::new();
    assert!(executor.run("   ").await.is_err());
}
