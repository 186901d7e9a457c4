//! Scripted engine and sandbox for exercising the executor without a real
//! engine process.

use super::{Engine, EngineInvocation, EngineOutput, EngineSession, Sandbox, Telemetry};
use crate::engine::LlmTotals;
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    /// Retryable failure.
    Fail(String),
    /// Panics inside the run task.
    Crash,
    /// Never finishes on its own.
    Hang,
}

/// Behaviour of one launched run.
#[derive(Debug, Clone)]
pub struct RunScript {
    /// Successive `telemetry()` results; the last one repeats.
    pub telemetry: Vec<Telemetry>,
    pub duration: Duration,
    pub outcome: Outcome,
    pub run_dir: Option<PathBuf>,
    /// The first this many telemetry reads fail.
    pub telemetry_errors: usize,
    /// Reads after the failing ones that panic.
    pub telemetry_panics: usize,
    /// Rejects every directive.
    pub reject_directives: bool,
}

impl RunScript {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            telemetry: Vec::new(),
            duration: Duration::from_millis(20),
            outcome,
            run_dir: None,
            telemetry_errors: 0,
            telemetry_panics: 0,
            reject_directives: false,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Vec<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Telemetry frames that only differ in reported cost.
    pub fn with_costs(mut self, costs: &[f64], iteration: u32, max: u32) -> Self {
        self.telemetry = costs
            .iter()
            .map(|&cost| Telemetry {
                totals: LlmTotals {
                    cost,
                    ..LlmTotals::default()
                },
                iteration: super::IterationBudget { current: iteration, max },
                ..Telemetry::default()
            })
            .collect();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_run_dir(mut self, dir: PathBuf) -> Self {
        self.run_dir = Some(dir);
        self
    }

    pub fn with_telemetry_faults(mut self, errors: usize, panics: usize) -> Self {
        self.telemetry_errors = errors;
        self.telemetry_panics = panics;
        self
    }

    pub fn rejecting_directives(mut self) -> Self {
        self.reject_directives = true;
        self
    }
}

/// Everything the executor asked of the engine.
#[derive(Debug, Default)]
pub struct Recorded {
    pub invocations: Vec<EngineInvocation>,
    pub directives: Vec<String>,
    /// Telemetry reads made before each directive arrived.
    pub directive_after_reads: Vec<usize>,
    pub iteration_limits: Vec<u32>,
    pub telemetry_reads: usize,
}

/// Engine that plays back one script per launch.
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<RunScript>>,
    pub recorded: Arc<Mutex<Recorded>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<RunScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    pub fn launches(&self) -> usize {
        self.recorded.lock().unwrap().invocations.len()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn launch(&self, invocation: EngineInvocation) -> Result<Arc<dyn EngineSession>, EngineError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Launch("no scripted run left".to_string()))?;
        let run_name = invocation.run_name.clone();
        self.recorded.lock().unwrap().invocations.push(invocation);
        Ok(Arc::new(ScriptedSession {
            run_name,
            script,
            reads: AtomicUsize::new(0),
            recorded: self.recorded.clone(),
        }))
    }
}

struct ScriptedSession {
    run_name: String,
    script: RunScript,
    reads: AtomicUsize,
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    fn run_name(&self) -> &str {
        &self.run_name
    }

    async fn telemetry(&self) -> Result<Telemetry, EngineError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().telemetry_reads += 1;
        if n < self.script.telemetry_errors {
            return Err(EngineError::Telemetry("telemetry.json is being rewritten".to_string()));
        }
        if n < self.script.telemetry_errors + self.script.telemetry_panics {
            panic!("scripted telemetry panic");
        }

        let frames = &self.script.telemetry;
        let frame = n - self.script.telemetry_errors - self.script.telemetry_panics;
        Ok(frames
            .get(frame)
            .or_else(|| frames.last())
            .cloned()
            .unwrap_or_default())
    }

    async fn inject_directive(&self, message: &str) -> Result<(), EngineError> {
        if self.script.reject_directives {
            return Err(EngineError::Reported("agent is not accepting messages".to_string()));
        }
        let mut recorded = self.recorded.lock().unwrap();
        let reads = recorded.telemetry_reads;
        recorded.directives.push(message.to_string());
        recorded.directive_after_reads.push(reads);
        Ok(())
    }

    async fn limit_iterations(&self, max_iterations: u32) -> Result<(), EngineError> {
        self.recorded.lock().unwrap().iteration_limits.push(max_iterations);
        Ok(())
    }

    async fn execute(&self) -> Result<EngineOutput, EngineError> {
        tokio::time::sleep(self.script.duration).await;
        match &self.script.outcome {
            Outcome::Success => Ok(EngineOutput {
                run_dir: self.script.run_dir.clone(),
            }),
            Outcome::Fail(reason) => Err(EngineError::Reported(reason.clone())),
            Outcome::Crash => panic!("scripted engine crash"),
            Outcome::Hang => std::future::pending().await,
        }
    }
}

/// Sandbox that records what it was asked to clean.
#[derive(Default)]
pub struct RecordingSandbox {
    pub reclaimed: Mutex<Vec<String>>,
    pub sweeps: AtomicUsize,
}

#[async_trait]
impl Sandbox for RecordingSandbox {
    async fn reclaim(&self, run_name: &str) -> Result<usize, EngineError> {
        self.reclaimed.lock().unwrap().push(run_name.to_string());
        Ok(1)
    }

    async fn sweep(&self) -> Result<usize, EngineError> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}
