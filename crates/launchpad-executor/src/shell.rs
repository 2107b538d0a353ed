//! Local shell runner.

use async_trait::async_trait;
use launchpad_core::executor::{OutputTail, Script, ScriptOutcome, ScriptRunner};
use launchpad_core::{BuildLog, Error, Result};
use std::collections::HashSet;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs scripts with `sh -c` in the script's directory.
///
/// Output is forwarded to the build log line by line as it is produced.
/// Each script gets its own process group so the whole `sh -c` subtree can
/// be killed through [`ActiveChildren`].
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    active: ActiveChildren,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Use a different POSIX shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            active: ActiveChildren::default(),
        }
    }

    /// Handle on the scripts this runner currently has running.
    pub fn active(&self) -> ActiveChildren {
        self.active.clone()
    }
}

/// Process groups of running scripts, shared between clones of a runner.
#[derive(Debug, Clone, Default)]
pub struct ActiveChildren {
    groups: Arc<Mutex<HashSet<u32>>>,
}

impl ActiveChildren {
    pub fn len(&self) -> usize {
        self.groups.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SIGKILL every running script's process group. Returns how many
    /// groups were signalled.
    pub async fn kill_all(&self) -> usize {
        let groups: Vec<u32> = match self.groups.lock() {
            Ok(groups) => groups.iter().copied().collect(),
            Err(_) => return 0,
        };
        let mut killed = 0;
        for group in groups {
            let status = Command::new("kill")
                .args(["-KILL", "--", &format!("-{group}")])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => killed += 1,
                Ok(status) => warn!(group, %status, "kill returned non-zero"),
                Err(e) => warn!(group, error = %e, "failed to run kill"),
            }
        }
        killed
    }

    fn register(&self, group: u32) -> Registration {
        if let Ok(mut groups) = self.groups.lock() {
            groups.insert(group);
        }
        Registration {
            active: self.clone(),
            group,
        }
    }
}

/// Removes its group from the active set when the script is done.
struct Registration {
    active: ActiveChildren,
    group: u32,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut groups) = self.active.groups.lock() {
            groups.remove(&self.group);
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRunner for ShellRunner {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn run(&self, script: &Script, log: &BuildLog) -> Result<ScriptOutcome> {
        info!(dir = %script.dir.display(), command = %script.command, "Running script");

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&script.command)
            .current_dir(&script.dir)
            .envs(&script.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let spawned = command.spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                log.stderr(format!("Process error: {}", e));
                return Err(Error::BuildFailure {
                    exit_code: None,
                    message: format!("failed to start '{}': {}", script.command, e),
                });
            }
        };

        // With process_group(0) the group id is the shell's pid.
        let _registration = child.id().map(|pid| self.active.register(pid));

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Internal("child output was not captured".to_string()));
        };

        let mut stdout = line_reader(stdout);
        let mut stderr = line_reader(stderr);
        let mut tail = OutputTail::default();
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_segment(), if stdout_open => match line {
                    Ok(Some(bytes)) => {
                        let line = decode(&bytes);
                        log.stdout(line.clone());
                        tail.push(line);
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading stdout");
                        stdout_open = false;
                    }
                },
                line = stderr.next_segment(), if stderr_open => match line {
                    Ok(Some(bytes)) => {
                        let line = decode(&bytes);
                        log.stderr(line.clone());
                        tail.push(line);
                    }
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading stderr");
                        stderr_open = false;
                    }
                },
            }
        }

        let status = child.wait().await?;
        let exit_code = exit_code(status);
        debug!(command = %script.command, exit_code, "Script finished");

        Ok(ScriptOutcome {
            exit_code,
            tail: tail.into_lines(),
        })
    }
}

fn line_reader<R: AsyncRead + Unpin>(reader: R) -> tokio::io::Split<BufReader<R>> {
    BufReader::new(reader).split(b'\n')
}

/// Lossy decode; tools do not always emit valid UTF-8.
fn decode(bytes: &[u8]) -> String {
    let line = String::from_utf8_lossy(bytes);
    line.strip_suffix('\r').unwrap_or(&*line).to_string()
}

/// Exit code, with signal deaths mapped to the shell's `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::ProjectId;
    use launchpad_core::testing::MemoryLogPublisher;
    use std::time::Duration;

    fn log() -> (BuildLog, Arc<MemoryLogPublisher>) {
        let publisher = Arc::new(MemoryLogPublisher::default());
        let log = BuildLog::new(ProjectId::parse("demo").unwrap(), publisher.clone());
        (log, publisher)
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (log, publisher) = log();

        let script = Script::new(dir.path(), "echo one; echo two 1>&2; echo three");
        let outcome = ShellRunner::new().run(&script, &log).await.unwrap();

        assert!(outcome.success());
        let lines = publisher.lines();
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"error: two".to_string()));
        assert!(lines.contains(&"three".to_string()));

        // Order within a stream is preserved.
        let one = lines.iter().position(|l| l == "one").unwrap();
        let three = lines.iter().position(|l| l == "three").unwrap();
        assert!(one < three);
        assert_eq!(outcome.tail.len(), 3);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = log();

        let script = Script::new(dir.path(), "echo boom 1>&2; exit 3");
        let outcome = ShellRunner::new().run(&script, &log).await.unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.output_contains("BOOM"));
    }

    #[tokio::test]
    async fn test_runs_in_script_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here\n").unwrap();
        let (log, publisher) = log();

        let script = Script::new(dir.path(), "cat marker.txt; echo \"$GREETING\"")
            .with_env("GREETING", "hello world");
        ShellRunner::new().run(&script, &log).await.unwrap();

        assert_eq!(publisher.lines(), vec!["here", "hello world"]);
    }

    #[tokio::test]
    async fn test_missing_shell_is_a_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (log, publisher) = log();

        let runner = ShellRunner::with_shell("/nonexistent/shell");
        let err = runner
            .run(&Script::new(dir.path(), "true"), &log)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BuildFailure { exit_code: None, .. }));
        assert!(publisher.last_line().unwrap().starts_with("error: Process error:"));
    }

    #[tokio::test]
    async fn test_signal_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = log();

        let outcome = ShellRunner::new()
            .run(&Script::new(dir.path(), "kill -TERM $$"), &log)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 143);
    }

    #[tokio::test]
    async fn test_kill_all_stops_script_and_its_children() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = log();
        let runner = ShellRunner::new();
        let active = runner.active();

        let script = Script::new(dir.path(), "sleep 30 & sleep 30; echo done");
        let running = tokio::spawn(async move { runner.run(&script, &log).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while active.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(active.kill_all().await, 1);

        let outcome = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.exit_code, 128 + 9);
        assert!(!outcome.output_contains("done"));
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_finished_script_is_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = log();
        let runner = ShellRunner::new();

        runner.run(&Script::new(dir.path(), "true"), &log).await.unwrap();
        assert!(runner.active().is_empty());
        assert_eq!(runner.active().kill_all().await, 0);
    }
}
