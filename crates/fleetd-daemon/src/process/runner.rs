//! Waited and detached command execution.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use fleetd_core::config::ProcessConfig;
use tokio::process::Command;
use tracing::{debug, info};

use super::{EnvOverrides, ProcessError, Reaper};

/// A program and its literal argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    env: EnvOverrides,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: EnvOverrides::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    pub const fn env_overrides(&self) -> &EnvOverrides {
        &self.env
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// Trimmed stdout on success, trimmed stderr otherwise.
    pub fn text(&self) -> &str {
        if self.success {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }

    pub fn into_pair(self) -> (bool, String) {
        let text = self.text().to_string();
        (self.success, text)
    }
}

/// Runs the administrative CLIs and other fixed programs.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pio: PathBuf,
    pios: PathBuf,
}

impl ProcessRunner {
    pub fn new(config: &ProcessConfig) -> Self {
        Self {
            pio: config.pio.clone(),
            pios: config.pios.clone(),
        }
    }

    pub fn pio(&self) -> &Path {
        &self.pio
    }

    pub fn pios(&self) -> &Path {
        &self.pios
    }

    /// Run `spec` and wait for it. Non-zero exit is reported, not raised.
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutcome, ProcessError> {
        info!(argv = %spec, env = ?spec.env, "Running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let output = cmd.output().await.map_err(|source| ProcessError::Spawn {
            program: spec.program_name(),
            source,
        })?;

        let outcome = CommandOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(argv = %spec, exit_code = ?outcome.exit_code, "Command finished");
        Ok(outcome)
    }

    /// Start `spec` in its own process group and return its pid immediately.
    ///
    /// Output is discarded. The child is handed to the installed [`Reaper`],
    /// so this fails with [`ProcessError::ReaperNotInstalled`] before startup
    /// has installed one.
    pub fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProcessError> {
        let reaper = Reaper::get().ok_or(ProcessError::ReaperNotInstalled)?;
        info!(argv = %spec, env = ?spec.env, "Spawning detached command");

        let child = std::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: spec.program_name(),
                source,
            })?;

        let pid = child.id();
        reaper.track(child)?;
        Ok(pid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(&ProcessConfig::default())
    }

    fn ensure_reaper() -> &'static Reaper {
        Reaper::install(Duration::from_millis(20))
            .or_else(|_| Reaper::get().ok_or(ProcessError::ReaperNotInstalled))
            .unwrap()
    }

    #[tokio::test]
    async fn zero_exit_returns_stdout() {
        let outcome = runner()
            .run(&CommandSpec::new("echo").arg("hello world"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.into_pair(), (true, "hello world".to_string()));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_result_not_an_error() {
        let outcome = runner().run(&CommandSpec::new("false")).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
    }

    #[tokio::test]
    async fn failure_text_is_stderr() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo out; echo 'bad input' >&2; exit 3");
        let outcome = runner().run(&spec).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.into_pair(), (false, "bad input".to_string()));
    }

    #[tokio::test]
    async fn arguments_are_not_shell_interpreted() {
        let outcome = runner()
            .run(&CommandSpec::new("echo").arg("$HOME; rm -rf /"))
            .await
            .unwrap();
        assert_eq!(outcome.text(), "$HOME; rm -rf /");
    }

    #[tokio::test]
    async fn allowed_env_reaches_child() {
        let env: EnvOverrides = [("EXPERIMENT", "exp42"), ("LD_PRELOAD", "x.so")]
            .into_iter()
            .collect();
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo \"$EXPERIMENT:${LD_PRELOAD:-unset}\"")
            .env(env);
        let outcome = runner().run(&spec).await.unwrap();
        assert_eq!(outcome.text(), "exp42:unset");
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = runner()
            .run(&CommandSpec::new("/nonexistent/fleetd-test-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn argv_renders_program_first() {
        let spec = CommandSpec::new("/usr/local/bin/pio")
            .arg("run")
            .args(["stirring", "--target-rpm", "400"]);
        assert_eq!(
            spec.argv(),
            vec!["/usr/local/bin/pio", "run", "stirring", "--target-rpm", "400"]
        );
        assert_eq!(spec.to_string(), "/usr/local/bin/pio run stirring --target-rpm 400");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn detached_spawn_returns_quickly_and_is_reaped() {
        ensure_reaper();

        let started = Instant::now();
        let pid = runner()
            .spawn_detached(&CommandSpec::new("sh").arg("-c").arg("sleep 0.2"))
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));

        let proc_path = PathBuf::from(format!("/proc/{pid}"));
        let deadline = Instant::now() + Duration::from_secs(5);
        while proc_path.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!proc_path.exists(), "child {pid} was not reaped");
    }

    #[test]
    fn second_install_is_rejected() {
        ensure_reaper();
        let err = Reaper::install(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ProcessError::ReaperAlreadyInstalled));
    }
}
