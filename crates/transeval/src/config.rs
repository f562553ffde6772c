//! Runner configuration: model endpoints, compiler, and the evaluation
//! sections, all in one TOML file.
//!
//! ```toml
//! [compiler]
//! program = "g++"
//! args = "-std=c++17 -Wall -Werror {source} -o {output}"
//! timeout_secs = 30
//! # scratch_dir = "/var/tmp/transeval"
//!
//! [[models]]
//! name = "gpt-4o"
//! url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [refinement]
//! max_iterations = 5
//! ```
//!
//! Environment overrides (applied after the file):
//! - `TRANSEVAL_GENERATOR_URL`: endpoint for the model named by
//!   `TRANSEVAL_MODEL` (default `default`), added if not configured
//! - `TRANSEVAL_API_KEY`: API key for endpoints that have none
//! - `TRANSEVAL_COMPILER`: compiler program

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use evaluation::EvaluationConfig;
use serde::{Deserialize, Serialize};

pub const ENV_GENERATOR_URL: &str = "TRANSEVAL_GENERATOR_URL";
pub const ENV_API_KEY: &str = "TRANSEVAL_API_KEY";
pub const ENV_MODEL: &str = "TRANSEVAL_MODEL";
pub const ENV_COMPILER: &str = "TRANSEVAL_COMPILER";

/// How candidates are compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub program: String,
    /// Shell-style argument string. `{source}` and `{output}` are replaced
    /// with the candidate file and output paths; the source path is appended
    /// when `{source}` is absent.
    pub args: String,
    pub timeout_secs: u64,
    /// Diagnostics beyond this many bytes are cut.
    pub max_diagnostic_bytes: usize,
    /// Parent of the per-candidate build directories (system temp dir when
    /// unset).
    pub scratch_dir: Option<PathBuf>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "g++".to_string(),
            args: "-std=c++17 -Wall -Werror {source} -o {output}".to_string(),
            timeout_secs: 30,
            max_diagnostic_bytes: 16 * 1024,
            scratch_dir: None,
        }
    }
}

impl CompilerConfig {
    pub fn split_args(&self) -> Result<Vec<String>> {
        shlex::split(&self.args)
            .with_context(|| format!("compiler.args is not a valid argument string: {}", self.args))
    }
}

/// One OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Name recorded on results and used on the command line.
    pub name: String,
    /// Base URL; `/chat/completions` is appended.
    pub url: String,
    /// Model id sent to the endpoint; defaults to `name`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> u64 {
    120
}

impl ModelEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            model: None,
            api_key: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub compiler: CompilerConfig,
    pub models: Vec<ModelEndpoint>,
    #[serde(flatten)]
    pub evaluation: EvaluationConfig,
}

impl RunnerConfig {
    /// Load from `path` (or defaults when `None`), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(program) = lookup(ENV_COMPILER) {
            self.compiler.program = program;
        }

        if let Some(url) = lookup(ENV_GENERATOR_URL) {
            let name = lookup(ENV_MODEL).unwrap_or_else(|| "default".to_string());
            match self.models.iter_mut().find(|m| m.name == name) {
                Some(endpoint) => endpoint.url = url,
                None => self.models.push(ModelEndpoint::new(name, url)),
            }
        }

        let fallback_key = lookup(ENV_API_KEY);
        for endpoint in &mut self.models {
            if endpoint.api_key.is_none() {
                endpoint.api_key = endpoint
                    .api_key_env
                    .as_deref()
                    .and_then(&lookup)
                    .or_else(|| fallback_key.clone());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.evaluation.validate()?;
        if self.compiler.program.trim().is_empty() {
            bail!("compiler.program must not be empty");
        }
        if self.compiler.timeout_secs == 0 {
            bail!("compiler.timeout_secs must be >= 1");
        }
        self.compiler.split_args()?;

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.models {
            if endpoint.name.trim().is_empty() {
                bail!("every [[models]] entry needs a name");
            }
            if endpoint.url.trim().is_empty() {
                bail!("model `{}` has an empty url", endpoint.name);
            }
            if !seen.insert(endpoint.name.as_str()) {
                bail!("model `{}` is configured twice", endpoint.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::from_toml_str("").unwrap();
        assert_eq!(config.compiler.program, "g++");
        assert_eq!(
            config.compiler.split_args().unwrap(),
            vec!["-std=c++17", "-Wall", "-Werror", "{source}", "-o", "{output}"]
        );
        assert!(config.models.is_empty());
        assert_eq!(config.evaluation, EvaluationConfig::default());
    }

    #[test]
    fn test_full_file() {
        let config = RunnerConfig::from_toml_str(
            r#"
[compiler]
program = "clang++"
timeout_secs = 10

[[models]]
name = "local"
url = "http://localhost:8080/v1"
model = "qwen2.5-coder"

[[models]]
name = "cloud"
url = "https://api.example.com/v1"
api_key_env = "CLOUD_KEY"
temperature = 0.0

[refinement]
max_iterations = 3
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.compiler.program, "clang++");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].model_id(), "qwen2.5-coder");
        assert_eq!(config.models[1].model_id(), "cloud");
        assert_eq!(config.models[1].max_tokens, 4096);
        assert_eq!(config.evaluation.refinement.max_iterations, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RunnerConfig::from_toml_str(
            "[[models]]\nname = \"cloud\"\nurl = \"https://old\"\napi_key_env = \"CLOUD_KEY\"\n",
        )
        .unwrap();
        config.apply_env(env(&[
            (ENV_COMPILER, "clang++"),
            (ENV_GENERATOR_URL, "http://localhost:9000/v1"),
            (ENV_MODEL, "local"),
            (ENV_API_KEY, "fallback"),
            ("CLOUD_KEY", "secret"),
        ]));

        assert_eq!(config.compiler.program, "clang++");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].api_key.as_deref(), Some("secret"));
        assert_eq!(config.models[1].name, "local");
        assert_eq!(config.models[1].api_key.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_env_url_replaces_named_model() {
        let mut config =
            RunnerConfig::from_toml_str("[[models]]\nname = \"default\"\nurl = \"https://old\"\n").unwrap();
        config.apply_env(env(&[(ENV_GENERATOR_URL, "https://new")]));
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].url, "https://new");
    }

    #[test]
    fn test_validation_failures() {
        for toml in [
            "[compiler]\ntimeout_secs = 0",
            "[compiler]\nprogram = \"\"",
            "[compiler]\nargs = \"-o 'unterminated\"",
            "[[models]]\nname = \"a\"\nurl = \"\"",
            "[[models]]\nname = \"a\"\nurl = \"x\"\n[[models]]\nname = \"a\"\nurl = \"y\"",
            "[refinement]\nmax_iterations = 0",
        ] {
            let config = RunnerConfig::from_toml_str(toml).unwrap();
            assert!(config.validate().is_err(), "{toml} should be rejected");
        }
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.toml");
        std::fs::write(&path, "[batch]\nmax_concurrent_samples = 2\n").unwrap();
        let config = RunnerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.evaluation.batch.max_concurrent_samples, 2);
    }
}
