use std::sync::Arc;

use dageval_core::*;
use tracing_subscriber::EnvFilter;

// Requires a local Ollama server: `ollama pull llama3 && ollama serve`.
const DAG: &str = r#"
root: grounded
nodes:
  grounded:
    type: binary_judgment
    criteria: Is every claim in the actual output supported by the retrieval context?
    evaluation_params: [actual_output, retrieval_context]
    children: [grounded_yes, grounded_no]
  grounded_yes: { type: verdict, verdict: true, child: completeness }
  grounded_no: { type: verdict, verdict: false, score: 0 }
  completeness:
    type: non_binary_judgment
    criteria: How completely does the actual output answer the input?
    evaluation_params: [input, actual_output]
    children: [complete, partial, off_topic]
  complete: { type: verdict, verdict: complete, score: 10 }
  partial: { type: verdict, verdict: partial, score: 6 }
  off_topic: { type: verdict, verdict: off topic, score: 2 }
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dageval_core=debug")))
        .init();

    let dag = DagConfig::from_yaml_str(DAG)?.build()?;
    let base_url = std::env::var("OLLAMA_URL").unwrap_or_else(|_| model::DEFAULT_BASE_URL.to_string());
    let judge = OllamaModel::new("llama3").base_url(base_url).temperature(0.0)?;
    let metric = DagMetric::new("Grounded Answer", dag, Arc::new(judge)).threshold(0.6);

    let case = TestCase::new(
        "When was the Eiffel Tower finished?",
        "It was completed in 1889 for the World's Fair.",
    )
    .retrieval_context(vec![
        "The Eiffel Tower was completed in March 1889 as the entrance arch to the 1889 World's Fair.".into(),
    ]);

    let outcome = metric.a_measure(&case).await?;
    println!("score {:.2} passed={}", outcome.score, outcome.success);
    if let Some(reason) = &outcome.reason {
        println!("reason: {reason}");
    }
    println!("\n{}", outcome.verbose_logs());
    Ok(())
}
