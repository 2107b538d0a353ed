//! Script execution seam.
//!
//! Every external command the pipeline runs (installers, compilers, hosting
//! CLIs) goes through a `ScriptRunner`, which streams output into the build log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::Result;
use crate::deployment::EnvVars;
use crate::log::BuildLog;

/// A shell command line to run in a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub dir: PathBuf,
    pub command: String,
    /// Extra variables for the child, on top of the inherited environment.
    pub env: EnvVars,
}

impl Script {
    pub fn new(dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            command: command.into(),
            env: EnvVars::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Result of a script that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutcome {
    pub exit_code: i32,
    /// Most recent output lines (stdout and stderr interleaved).
    pub tail: Vec<String>,
}

impl ScriptOutcome {
    pub const TAIL_LINES: usize = 200;

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output_contains(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.tail
            .iter()
            .any(|line| line.to_ascii_lowercase().contains(&needle))
    }
}

/// Bounded buffer of the latest output lines.
#[derive(Debug, Default)]
pub struct OutputTail {
    lines: VecDeque<String>,
}

impl OutputTail {
    pub fn push(&mut self, line: String) {
        if self.lines.len() == ScriptOutcome::TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run a script to completion, publishing each output line to `log`.
    ///
    /// A non-zero exit is reported through `ScriptOutcome`; only a failure to
    /// start the process is an `Err` (`Error::BuildFailure` without an exit code).
    async fn run(&self, script: &Script, log: &BuildLog) -> Result<ScriptOutcome>;
}
