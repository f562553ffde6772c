//! Sample manifests: one JSON object per line.
//!
//! ```json
//! {"id": "sum_loop", "source": "program sum ...", "reference": "int main() {...}"}
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use evaluation::Sample;

pub struct SampleManifest;

impl SampleManifest {
    pub fn load(path: &Path) -> Result<Vec<Sample>> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sample manifest {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid sample manifest {}", path.display()))
    }

    /// Blank lines are skipped; ids must be unique and sources non-empty.
    pub fn parse(text: &str) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        let mut ids = HashSet::new();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line)
                .with_context(|| format!("line {line_no}: not a sample object"))?;
            if sample.id.trim().is_empty() {
                bail!("line {line_no}: empty sample id");
            }
            if sample.source.trim().is_empty() {
                bail!("line {line_no}: sample `{}` has no source", sample.id);
            }
            if !ids.insert(sample.id.clone()) {
                bail!("line {line_no}: duplicate sample id `{}`", sample.id);
            }
            samples.push(sample);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let text = r#"{"id": "a", "source": "program a\nend", "reference": "int main() {}"}

{"id": "b", "source": "program b\nend", "initial_candidate": "int main() { return 1; }"}
"#;
        let samples = SampleManifest::parse(text).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].reference.as_deref(), Some("int main() {}"));
        assert!(samples[0].initial_candidate.is_none());
        assert!(samples[1].reference.is_none());
        assert!(samples[1].initial_candidate.is_some());
    }

    #[test]
    fn test_rejects_bad_lines() {
        for (text, needle) in [
            ("{\"id\": \"a\"}", "line 1"),
            ("{\"id\": \"\", \"source\": \"x\"}", "empty sample id"),
            ("{\"id\": \"a\", \"source\": \" \"}", "no source"),
            (
                "{\"id\": \"a\", \"source\": \"x\"}\n{\"id\": \"a\", \"source\": \"y\"}",
                "duplicate",
            ),
        ] {
            let err = SampleManifest::parse(text).unwrap_err();
            assert!(format!("{err:#}").contains(needle), "{text}: {err:#}");
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = SampleManifest::load(Path::new("/nonexistent/samples.jsonl")).unwrap_err();
        assert!(err.to_string().contains("Failed to read sample manifest"));
    }
}
