//! CompilerProbe driven by small `sh` scripts standing in for a compiler.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evaluation::{
    BatchRunner, CompilationProbe, ErrorCategory, EvalError, EvalResult, EvaluationConfig,
    GenerationRequest, Generator, Sample, TargetLanguage, TerminalState,
};
use tokio_util::sync::CancellationToken;
use transeval::{CompilerConfig, CompilerProbe};

/// Fails with an undeclared-type diagnostic whenever the source mentions
/// BROKEN.
const CHECKER: &str = r#"-c 'if grep -q BROKEN "$1"; then echo "$1:3:5: error: unknown type name vectr" >&2; exit 1; fi; echo ok' sh {source}"#;

fn probe(args: &str) -> CompilerProbe {
    let config = CompilerConfig {
        program: "sh".to_string(),
        args: args.to_string(),
        ..Default::default()
    };
    CompilerProbe::from_config(&config, TargetLanguage::Cpp).unwrap()
}

#[tokio::test]
async fn test_clean_source_compiles() {
    let outcome = probe(CHECKER).compile("int main() { return 0; }").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.exit_status, Some(0));
    assert_eq!(outcome.diagnostics.trim(), "ok");
}

#[tokio::test]
async fn test_failure_reports_diagnostics() {
    let outcome = probe(CHECKER).compile("BROKEN vectr<int> v;").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.exit_status, Some(1));
    assert!(outcome.diagnostics.contains("candidate.cpp:3:5: error: unknown type name vectr"));
}

#[tokio::test]
async fn test_diagnostics_truncated() {
    let config = CompilerConfig {
        program: "sh".to_string(),
        args: "-c 'printf \"%0500d\" 0 >&2; exit 1'".to_string(),
        max_diagnostic_bytes: 64,
        ..Default::default()
    };
    let probe = CompilerProbe::from_config(&config, TargetLanguage::Cpp).unwrap();
    let outcome = probe.compile("int x;").await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.diagnostics.len(), 64);
}

#[tokio::test]
async fn test_timeout_is_infrastructural() {
    let probe = probe("-c 'sleep 5'").with_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let err = probe.compile("int main() {}").await.unwrap_err();
    assert!(matches!(err, EvalError::Probe(_)), "{err}");
    assert!(err.to_string().contains("timed out"));
    assert!(err.is_retriable());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_missing_compiler_is_infrastructural() {
    let config = CompilerConfig {
        program: "/nonexistent/c++".to_string(),
        ..Default::default()
    };
    let probe = CompilerProbe::from_config(&config, TargetLanguage::Cpp).unwrap();
    let err = probe.compile("int main() {}").await.unwrap_err();
    assert!(err.to_string().contains("failed to execute /nonexistent/c++"));
}

struct FixingGenerator;

#[async_trait]
impl Generator for FixingGenerator {
    fn name(&self) -> &str {
        "fixer"
    }

    async fn generate(&self, _request: &GenerationRequest) -> EvalResult<String> {
        Ok("#include <vector>\nint main() { std::vector<int> v; return 0; }\n".to_string())
    }
}

#[tokio::test]
async fn test_refinement_repairs_with_real_probe() {
    let probe: Arc<dyn CompilationProbe> = Arc::new(probe(CHECKER));
    let runner = BatchRunner::new(Arc::new(FixingGenerator), probe, &EvaluationConfig::default()).unwrap();

    let samples = vec![
        Sample::new("broken", "program p\nend program p").with_initial_candidate("BROKEN vectr<int> v;"),
        Sample::new("clean", "program q\nend program q")
            .with_initial_candidate("int main() { return 0; }"),
    ];
    let mut results = runner.run(samples, &CancellationToken::new()).await;
    results.sort_by(|a, b| a.sample_id.cmp(&b.sample_id));

    let broken = &results[0];
    assert_eq!(broken.terminal, TerminalState::Converged);
    assert_eq!(broken.attempts.len(), 2);
    assert!(!broken.attempts[0].compiled());
    assert_eq!(
        broken.attempts[0].errors()[0].category,
        ErrorCategory::UndeclaredIdentifier
    );
    assert!(broken.attempts[1].compiled());

    let clean = &results[1];
    assert_eq!(clean.terminal, TerminalState::Converged);
    assert_eq!(clean.attempts.len(), 1);
}
