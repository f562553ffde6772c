//! Scripted generators and probes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use evaluation::{CompilationProbe, EvalError, EvalResult, GenerationRequest, Generator, ProbeOutcome};

pub const REFERENCE_CPP: &str = r#"#include <iostream>
int main() {
    int total = 0;
    for (int i = 1; i <= 10; i++) {
        total += i;
    }
    std::cout << total << std::endl;
    return 0;
}
"#;

pub const FORTRAN_SOURCE: &str = r#"program sum
  integer :: total, i
  total = 0
  do i = 1, 10
    total = total + i
  end do
  print *, total
end program sum
"#;

/// Answers every request with a distinct, iteration-tagged candidate and
/// records the requests it saw.
pub struct ScriptedGenerator {
    name: String,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.prompt.clone()).collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!(
            "int main() {{\n    int total = {};\n    return total;\n}}\n",
            request.iteration
        ))
    }
}

/// Misbehaves for one sample id, answers normally for the rest.
pub enum Misbehavior {
    Panic,
    EmptyOutput,
}

pub struct SelectiveGenerator {
    pub bad_sample: String,
    pub misbehavior: Misbehavior,
}

#[async_trait]
impl Generator for SelectiveGenerator {
    fn name(&self) -> &str {
        "selective"
    }

    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
        if request.sample_id == self.bad_sample {
            match self.misbehavior {
                Misbehavior::Panic => panic!("generator blew up on {}", request.sample_id),
                Misbehavior::EmptyOutput => return Ok("   ".to_string()),
            }
        }
        Ok("int main() { return 0; }".to_string())
    }
}

/// Replays queued outcomes in order, compiling successfully once the queue
/// runs dry.
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<EvalResult<ProbeOutcome>>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(outcomes: Vec<EvalResult<ProbeOutcome>>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail with each diagnostic in turn, then succeed.
    pub fn failing_with(diagnostics: &[&str]) -> Self {
        Self::new(
            diagnostics
                .iter()
                .map(|d| Ok(ProbeOutcome::failure(*d, Some(1))))
                .collect(),
        )
    }

    /// Reports the same `diagnostic` `times` times, then succeeds.
    pub fn always_failing(diagnostic: &str, times: usize) -> Self {
        Self::failing_with(&vec![diagnostic; times])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompilationProbe for ScriptedProbe {
    async fn compile(&self, _candidate: &str) -> EvalResult<ProbeOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProbeOutcome::success()))
    }
}

pub struct AlwaysCompiles;

#[async_trait]
impl CompilationProbe for AlwaysCompiles {
    async fn compile(&self, _candidate: &str) -> EvalResult<ProbeOutcome> {
        Ok(ProbeOutcome::success())
    }
}

/// Never answers.
pub struct HangingProbe;

#[async_trait]
impl CompilationProbe for HangingProbe {
    async fn compile(&self, _candidate: &str) -> EvalResult<ProbeOutcome> {
        std::future::pending::<()>().await;
        Err(EvalError::Probe("unreachable".to_string()))
    }
}

pub fn probe_timeout() -> EvalResult<ProbeOutcome> {
    Err(EvalError::Probe("compiler timed out after 30s".to_string()))
}
