//! Running external commands, optionally as root and inside a network namespace.

use std::{io, process};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty commmand provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected exit status {}: {}", .0.status, .0.stderr.trim())]
    NonZero(Output),
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Return the `ip netns exec <namespace>` prefix used to run a command inside a namespace.
#[inline]
pub fn netns_prefix(namespace: &str) -> Vec<String> {
    vec!["ip".to_string(), "netns".to_string(), "exec".to_string(), namespace.to_string()]
}

/// A command to execute, together with how its exit status should be judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub run_as_root: bool,
    pub check_exit_code: bool,
    /// Exit codes accepted on top of `0` when `check_exit_code` is set.
    pub extra_ok_codes: Vec<i32>,
}

impl CommandSpec {
    /// A command run as root whose exit code is checked.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            run_as_root: true,
            check_exit_code: true,
            extra_ok_codes: Vec::new(),
        }
    }

    /// Prefixes the command so that it runs inside `namespace`.
    pub fn in_namespace(mut self, namespace: Option<&str>) -> Self {
        if let Some(namespace) = namespace {
            let mut argv = netns_prefix(namespace);
            argv.append(&mut self.argv);
            self.argv = argv;
        }
        self
    }

    pub fn with_extra_ok_codes(mut self, codes: Vec<i32>) -> Self {
        self.extra_ok_codes = codes;
        self
    }

    pub fn unchecked(mut self) -> Self {
        self.check_exit_code = false;
        self
    }

    /// Returns true if `code` counts as success for this command.
    pub fn accepts(&self, code: Option<i32>) -> bool {
        if !self.check_exit_code {
            return true;
        }

        match code {
            Some(0) => true,
            Some(code) => self.extra_ok_codes.contains(&code),
            // Killed by a signal.
            None => false,
        }
    }
}

/// Something that can run a [`CommandSpec`] and hand back its standard output.
pub trait Executor: Send + Sync {
    fn execute(&self, cmd: &CommandSpec) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Prepended to every command that runs as root.
    pub root_helper: Vec<String>,
}

impl RunnerOptions {
    pub fn with_root_helper<I, S>(mut self, root_helper: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_helper = root_helper.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { root_helper: vec!["sudo".to_string()] }
    }
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    options: RunnerOptions,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    /// The full argument vector that will be spawned for `cmd`.
    pub fn argv(&self, cmd: &CommandSpec) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.options.root_helper.len() + cmd.argv.len());
        if cmd.run_as_root {
            argv.extend(self.options.root_helper.iter().cloned());
        }
        argv.extend(cmd.argv.iter().cloned());
        argv
    }
}

impl Executor for Runner {
    fn execute(&self, spec: &CommandSpec) -> Result<String> {
        let argv = self.argv(spec);
        let mut iter = argv.iter();
        let program = iter.next().ok_or(Error::Empty)?;
        let mut cmd = process::Command::new(program);
        cmd.args(iter).stderr(process::Stdio::piped()).stdout(process::Stdio::piped());

        tracing::debug!(?cmd, "running command");

        let output: Output = cmd.spawn()?.wait_with_output()?.into();

        if !spec.accepts(output.status.code()) {
            tracing::debug!(
                ?output.stderr,
                ?output.status,
                ?cmd,
                "command returned non-zero status"
            );
            return Err(Error::NonZero(output));
        }

        Ok(output.stdout)
    }
}
