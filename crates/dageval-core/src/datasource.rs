use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::types::TestCase;

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<TestCase>>;
}

pub struct VecDataSource {
    cases: Vec<TestCase>,
}

impl VecDataSource {
    pub fn new(cases: Vec<TestCase>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<TestCase>> {
        Ok(self.cases.clone())
    }
}

/// Read JSONL where each line is one test case, e.g.
/// `{"id": "q1", "input": "...", "actual_output": "...", "retrieval_context": ["..."]}`.
/// Only `input` is required.
pub struct JsonlDataSource {
    path: PathBuf,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<TestCase>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        parse_jsonl(&content)
    }
}

fn parse_jsonl(content: &str) -> Result<Vec<TestCase>> {
    let mut cases = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let case: TestCase = serde_json::from_str(line)
            .with_context(|| format!("Invalid test case on line {}", idx + 1))?;
        cases.push(case);
    }
    Ok(cases)
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_cases_and_skips_blank_lines() {
        let content = r#"{"id": "q1", "input": "What is 2+2?", "actual_output": "4"}

{"input": "Summarize", "retrieval_context": ["doc a", "doc b"]}
"#;
        let cases = parse_jsonl(content).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id.as_deref(), Some("q1"));
        assert_eq!(cases[0].actual_output.as_deref(), Some("4"));
        assert_eq!(cases[1].retrieval_context.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn reports_bad_line_number() {
        let err = parse_jsonl("{\"input\": \"ok\"}\n{\"actual_output\": \"no input\"}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"input": "hi", "actual_output": "hello"}}"#).unwrap();
        let cases = JsonlDataSource::new(file.path()).load().await.unwrap();
        assert_eq!(cases[0].input, "hi");
    }
}
