//! Compiler-backed compilation probe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use evaluation::{CompilationProbe, EvalError, EvalResult, ProbeOutcome, TargetLanguage};
use tracing::debug;

use crate::config::CompilerConfig;

const SOURCE_PLACEHOLDER: &str = "{source}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Compiles each candidate in a fresh temporary directory.
#[derive(Debug, Clone)]
pub struct CompilerProbe {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    extension: &'static str,
    max_diagnostic_bytes: usize,
    scratch_dir: Option<PathBuf>,
}

impl CompilerProbe {
    pub fn from_config(config: &CompilerConfig, language: TargetLanguage) -> Result<Self> {
        Ok(Self {
            program: config.program.clone(),
            args: config.split_args()?,
            timeout: Duration::from_secs(config.timeout_secs),
            extension: language.source_extension(),
            max_diagnostic_bytes: config.max_diagnostic_bytes,
            scratch_dir: config.scratch_dir.clone(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_args(&self, source: &Path, output: &Path) -> Vec<String> {
        let source = source.display().to_string();
        let output = output.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, &source)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect();
        if !self.args.iter().any(|arg| arg.contains(SOURCE_PLACEHOLDER)) {
            args.push(source);
        }
        args
    }

    /// Fresh build directory holding the candidate source. Failures here are
    /// infrastructural, like a compiler crash.
    async fn prepare(&self, candidate: &str) -> EvalResult<(tempfile::TempDir, PathBuf)> {
        let dir = match &self.scratch_dir {
            Some(parent) => tempfile::tempdir_in(parent),
            None => tempfile::tempdir(),
        }
        .map_err(|e| EvalError::Probe(format!("failed to create build directory: {e}")))?;
        let source = dir.path().join(format!("candidate.{}", self.extension));
        tokio::fs::write(&source, candidate)
            .await
            .map_err(|e| EvalError::Probe(format!("failed to write {}: {e}", source.display())))?;
        Ok((dir, source))
    }

    /// Run a command with the probe timeout. The child runs in its own
    /// process group and is killed if the future is dropped.
    async fn run_with_timeout(
        &self,
        cmd: &mut tokio::process::Command,
    ) -> EvalResult<std::process::Output> {
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(EvalError::Probe(format!(
                "failed to execute {}: {e}",
                self.program
            ))),
            Err(_) => Err(EvalError::Probe(format!(
                "compiler timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

#[async_trait]
impl CompilationProbe for CompilerProbe {
    async fn compile(&self, candidate: &str) -> EvalResult<ProbeOutcome> {
        let (dir, source) = self.prepare(candidate).await?;
        let output = dir.path().join("candidate.out");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.command_args(&source, &output))
            .current_dir(dir.path());
        let result = self.run_with_timeout(&mut cmd).await?;

        let mut diagnostics = String::from_utf8_lossy(&result.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&result.stdout);
        if !stdout.trim().is_empty() {
            if !diagnostics.is_empty() && !diagnostics.ends_with('\n') {
                diagnostics.push('\n');
            }
            diagnostics.push_str(&stdout);
        }
        truncate_at_char_boundary(&mut diagnostics, self.max_diagnostic_bytes);

        debug!(
            program = %self.program,
            success = result.status.success(),
            exit_status = ?result.status.code(),
            diagnostic_bytes = diagnostics.len(),
            "Compilation finished"
        );
        Ok(ProbeOutcome {
            success: result.status.success(),
            diagnostics,
            exit_status: result.status.code(),
        })
    }
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
