//! Helper functions for launcher integration tests

use std::{future::Future, time::Duration};

use ecolaunch::{config::Config, RunOptions};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedSender};

/// Prepares the test directory, performs template replacement in the
/// provided configuration, runs the launcher, and returns the future
/// driving the launcher, the shutdown handle, and the temp directory.
///
/// The following template variables will be replaced in the `config`
/// string:
///
/// - `{result_path}` is replaced with the full path to the result file
///   that will be read at the completion of the test. Apps append to it
///   to show that they ran (and how they stopped).
/// - `{temp_path}` is replaced with the path to the test-specific
///   temporary directory (which can be used to store counters, for
///   example).
pub fn start(
    config: &str,
) -> (
    impl Future<Output = Result<(), ecolaunch::Error>>,
    UnboundedSender<()>,
    TempDir,
) {
    let dir = TempDir::new().unwrap();
    let result_path = dir.path().join("results.txt").to_str().unwrap().to_string();

    let config = Config::from_toml_str(
        &config
            .replace("{result_path}", &result_path)
            .replace("{temp_path}", dir.path().to_str().unwrap()),
    )
    .unwrap();

    let options = RunOptions {
        base_dir: Some(dir.path().to_owned()),
        strip_ansi: true,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let launcher = ecolaunch::run(config, options, rx);
    (launcher, tx, dir)
}

/// Waits (with a generous timeout) for the launcher to stop, then
/// collects the contents of the result file.
pub async fn stop(
    launcher: impl Future<Output = Result<(), ecolaunch::Error>>,
    dir: &TempDir,
) -> (Result<(), ecolaunch::Error>, String) {
    let result = tokio::time::timeout(Duration::from_secs(30), launcher)
        .await
        .expect("Launcher did not stop");

    (result, read_results(dir).await)
}

/// Reads the result file, which may not exist yet.
pub async fn read_results(dir: &TempDir) -> String {
    let result_path = dir.path().join("results.txt");
    match tokio::fs::read_to_string(result_path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => panic!("Unable to read result file: {err}"),
    }
}

/// Spawns a task that waits for `line` to appear in the result file,
/// then sends the shutdown signal.
#[allow(dead_code)]
pub fn shutdown_after(dir: &TempDir, line: &str, tx: UnboundedSender<()>) {
    let result_path = dir.path().join("results.txt");
    let line = line.to_owned();

    tokio::task::spawn(async move {
        loop {
            match tokio::fs::read_to_string(&result_path).await {
                Ok(text) if text.lines().any(|l| l == line) => break,
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => panic!("Unable to read result file: {err}"),
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(()).unwrap();
    });
}

/// Asserts that the launcher result is the `StartupAborted` error and
/// that the error report starts with the expected causes.
#[allow(dead_code)]
pub fn assert_startup_aborted(expected: &[&str], result: Result<(), ecolaunch::Error>) {
    match result {
        Err(ecolaunch::Error::StartupAborted(report)) => {
            let causes: Vec<String> = report.chain().map(|r| r.to_string()).collect();
            assert!(
                causes.len() >= expected.len(),
                "Too few causes in {causes:?}"
            );
            assert_eq!(expected, &causes[..expected.len()]);
        }
        Ok(_) | Err(_) => panic!("Expected StartupAborted error."),
    };
}
