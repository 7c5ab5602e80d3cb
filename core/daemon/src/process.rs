//! Child process helpers for collaborator commands.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{LockError, Result};

/// Spawns `argv` followed by `extra_args` without waiting for it. A reaper
/// thread collects the exit status so no zombie is left behind.
pub fn spawn_detached(
    label: &'static str,
    argv: &[String],
    extra_args: &[String],
    envs: &[(&str, String)],
) -> Result<()> {
    let (program, args) = argv.split_first().ok_or(LockError::CommandMissing(label))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    for (key, value) in envs {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|source| LockError::CommandSpawn {
        program: program.clone(),
        source,
    })?;

    thread::spawn(move || match child.wait() {
        Ok(status) if !status.success() => {
            tracing::debug!(command = label, status = %status, "Collaborator command exited non-zero");
        }
        Ok(_) => {}
        Err(err) => {
            tracing::debug!(command = label, error = %err, "Failed to reap collaborator command");
        }
    });

    Ok(())
}

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Runs `argv` and returns its stdout, or `None` when it cannot be spawned,
/// exits non-zero, or is still running after `timeout`. A command that
/// overruns is killed and reaped.
pub fn run_for_stdout(argv: &[String], timeout: Duration) -> Option<String> {
    let (program, args) = argv.split_first()?;
    let deadline = Instant::now() + timeout;

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            tracing::debug!(program = %program, error = %err, "Failed to spawn command");
            return None;
        }
    };

    let Some(mut stdout) = child.stdout.take() else {
        kill_and_reap(&mut child, program);
        return None;
    };
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = sender.send(stdout.read_to_end(&mut buffer).map(|_| buffer));
    });

    let output = match receiver.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(err)) => {
            tracing::debug!(program = %program, error = %err, "Failed to read command output");
            kill_and_reap(&mut child, program);
            return None;
        }
        Err(_) => {
            tracing::warn!(
                program = %program,
                timeout_ms = timeout.as_millis() as u64,
                "Command timed out; killing it"
            );
            kill_and_reap(&mut child, program);
            return None;
        }
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) if status.success() => {
                return Some(String::from_utf8_lossy(&output).to_string());
            }
            Ok(Some(status)) => {
                tracing::debug!(program = %program, status = %status, "Command exited non-zero");
                return None;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
            Ok(None) => {
                tracing::warn!(
                    program = %program,
                    "Command closed stdout but kept running; killing it"
                );
                kill_and_reap(&mut child, program);
                return None;
            }
            Err(err) => {
                tracing::debug!(program = %program, error = %err, "Failed to poll command");
                kill_and_reap(&mut child, program);
                return None;
            }
        }
    }
}

fn kill_and_reap(child: &mut Child, program: &str) {
    if let Err(err) = child.kill() {
        tracing::debug!(program = %program, error = %err, "Failed to kill command");
    }
    if let Err(err) = child.wait() {
        tracing::debug!(program = %program, error = %err, "Failed to reap command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn spawn_detached_requires_a_program() {
        let err = spawn_detached("presenter", &[], &[], &[]).unwrap_err();
        assert!(matches!(err, LockError::CommandMissing("presenter")));
    }

    #[test]
    fn spawn_detached_reports_missing_binary() {
        let err = spawn_detached(
            "capture",
            &argv(&["/nonexistent/applock-test-binary"]),
            &[],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, LockError::CommandSpawn { .. }));
    }

    #[test]
    fn spawn_detached_passes_args_and_env() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let out = temp_dir.path().join("out.txt");
        spawn_detached(
            "presenter",
            &argv(&["sh", "-c", "printf '%s %s' \"$1\" \"$APPLOCK_TEST\" > \"$2\"", "sh"]),
            &argv(&["com.example.bank", out.to_str().expect("utf8 path")]),
            &[("APPLOCK_TEST", "ok".to_string())],
        )
        .expect("spawn");

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(content) = std::fs::read_to_string(&out) {
                if content == "com.example.bank ok" {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "command output missing");
            thread::sleep(Duration::from_millis(20));
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn run_for_stdout_handles_failures() {
        assert_eq!(run_for_stdout(&[], TIMEOUT), None);
        assert_eq!(run_for_stdout(&argv(&["sh", "-c", "exit 3"]), TIMEOUT), None);
        assert_eq!(
            run_for_stdout(&argv(&["/nonexistent/applock-test-binary"]), TIMEOUT),
            None
        );
        assert_eq!(
            run_for_stdout(&argv(&["sh", "-c", "echo com.example.bank"]), TIMEOUT),
            Some("com.example.bank\n".to_string())
        );
    }

    #[test]
    fn run_for_stdout_kills_commands_past_the_deadline() {
        let started = Instant::now();
        assert_eq!(
            run_for_stdout(&argv(&["sleep", "4"]), Duration::from_millis(200)),
            None
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn run_for_stdout_kills_commands_that_close_stdout_and_hang() {
        let started = Instant::now();
        assert_eq!(
            run_for_stdout(
                &argv(&["sh", "-c", "exec >/dev/null; sleep 4"]),
                Duration::from_millis(200)
            ),
            None
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
