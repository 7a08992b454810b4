use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// The application under test: produces an actual output for an input.
#[async_trait]
pub trait Task: Send + Sync {
	async fn run(&self, input: &str) -> Result<String>;
}

/// Wrap an async closure as a `Task`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Task>
where
	F: Send + Sync + 'static + Fn(&str) -> Fut,
	Fut: Future<Output = Result<String>> + Send + 'static,
{
	struct ClosureTask<F, Fut>
	where
		F: Send + Sync + 'static + Fn(&str) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		f: F,
		_fut: PhantomData<fn() -> Fut>,
	}

	#[async_trait]
	impl<F, Fut> Task for ClosureTask<F, Fut>
	where
		F: Send + Sync + 'static + Fn(&str) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		async fn run(&self, input: &str) -> Result<String> {
			(self.f)(input).await
		}
	}

	Arc::new(ClosureTask { f, _fut: PhantomData })
}
