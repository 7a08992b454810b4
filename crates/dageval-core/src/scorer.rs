use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Score, TestCase};

/// Anything that turns a test case into a [`Score`]. Implemented by
/// [`DagMetric`](crate::DagMetric); the runner accepts any mix of scorers.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, case: &TestCase) -> Result<Score>;
}
