//! In-memory implementations of the core seams, for tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::artifact::ArtifactStore;
use crate::executor::{Script, ScriptOutcome, ScriptRunner};
use crate::log::{BuildLog, LogEvent, LogPublisher};
use crate::{Error, Result};

/// Publisher that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryLogPublisher {
    events: Mutex<Vec<LogEvent>>,
    closed: AtomicBool,
}

impl MemoryLogPublisher {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.text).collect()
    }

    pub fn last_line(&self) -> Option<String> {
        self.lines().pop()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogPublisher for MemoryLogPublisher {
    fn publish(&self, event: LogEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn close(&self, _grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Artifact store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    puts: Mutex<Vec<String>>,
    fail_uploads: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_uploads.store(true, Ordering::SeqCst);
        store
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Every key written, in write order, including overwrites.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn bucket(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::Remote(format!("upload of '{}' refused", key)));
        }
        self.puts.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }
}

type SideEffect = Box<dyn Fn(&Script) + Send + Sync>;

struct Rule {
    pattern: String,
    exit_code: i32,
    output: Vec<String>,
    effect: Option<SideEffect>,
}

/// Runner that answers scripts from a rule table instead of spawning them.
///
/// The first rule whose pattern is a substring of the command wins; scripts
/// matching no rule succeed silently.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    spawn_error: Option<String>,
    calls: Mutex<Vec<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, exit_code: i32, output: &[&str]) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            exit_code,
            output: output.iter().map(|s| s.to_string()).collect(),
            effect: None,
        });
        self
    }

    /// Succeed on `pattern` after running `effect` (e.g. creating files the
    /// real command would have produced).
    pub fn on(mut self, pattern: &str, effect: impl Fn(&Script) + Send + Sync + 'static) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            exit_code: 0,
            output: Vec::new(),
            effect: Some(Box::new(effect)),
        });
        self
    }

    /// Fail every script as if the shell binary were missing.
    pub fn unspawnable(mut self, message: &str) -> Self {
        self.spawn_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Script> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|s| s.command).collect()
    }
}

#[async_trait]
impl ScriptRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn run(&self, script: &Script, log: &BuildLog) -> Result<ScriptOutcome> {
        self.calls.lock().unwrap().push(script.clone());

        if let Some(message) = &self.spawn_error {
            log.stderr(format!("Process error: {}", message));
            return Err(Error::BuildFailure {
                exit_code: None,
                message: message.clone(),
            });
        }

        let Some(rule) = self
            .rules
            .iter()
            .find(|r| script.command.contains(&r.pattern))
        else {
            return Ok(ScriptOutcome::default());
        };

        if let Some(effect) = &rule.effect {
            effect(script);
        }
        for line in &rule.output {
            log.stdout(line.clone());
        }
        Ok(ScriptOutcome {
            exit_code: rule.exit_code,
            tail: rule.output.clone(),
        })
    }
}
