use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::criteria::CriteriaMetric;
use crate::dag::{
    BinaryJudgmentNode, Dag, DagBuilder, NodeId, NonBinaryJudgmentNode, TaskNode, VerdictChild,
    VerdictNode, VerdictValue,
};
use crate::model::DEFAULT_BASE_URL;
use crate::types::TestCaseParam;

/// A DAG described by name. Nodes reference each other through the keys
/// of `nodes`; `root` names the entry point.
///
/// ```yaml
/// root: correct
/// nodes:
///   correct:
///     type: binary_judgment
///     criteria: Does the actual output answer the question?
///     evaluation_params: [input, actual_output]
///     children: [yes, no]
///   yes: { type: verdict, verdict: true, score: 10 }
///   no: { type: verdict, verdict: false, score: 0 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagConfig {
    pub root: String,
    pub nodes: BTreeMap<String, NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum NodeConfig {
    Task {
        instructions: String,
        output_label: String,
        #[serde(default)]
        children: Vec<String>,
        #[serde(default)]
        evaluation_params: Vec<TestCaseParam>,
        #[serde(default)]
        label: Option<String>,
    },
    BinaryJudgment {
        criteria: String,
        children: Vec<String>,
        #[serde(default)]
        evaluation_params: Vec<TestCaseParam>,
        #[serde(default)]
        label: Option<String>,
    },
    NonBinaryJudgment {
        criteria: String,
        children: Vec<String>,
        #[serde(default)]
        evaluation_params: Vec<TestCaseParam>,
        #[serde(default)]
        label: Option<String>,
    },
    Verdict {
        verdict: VerdictValue,
        #[serde(default)]
        score: Option<i64>,
        #[serde(default)]
        child: Option<String>,
        #[serde(default)]
        criteria: Option<CriteriaConfig>,
    },
}

/// A rubric scored by the DAG's judge when its verdict is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaConfig {
    pub name: String,
    #[serde(default)]
    pub criteria: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub evaluation_params: Vec<TestCaseParam>,
}

impl CriteriaConfig {
    fn metric(&self) -> Result<CriteriaMetric> {
        let metric = match (&self.criteria, self.steps.is_empty()) {
            (_, false) => CriteriaMetric::with_steps(self.name.as_str(), self.steps.iter().cloned()),
            (Some(criteria), true) => CriteriaMetric::new(self.name.as_str(), criteria.as_str()),
            (None, true) => bail!("criteria `{}` needs either `criteria` or `steps`", self.name),
        };
        Ok(if self.evaluation_params.is_empty() {
            metric
        } else {
            metric.evaluation_params(self.evaluation_params.iter().copied())
        })
    }
}

impl DagConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        parse_by_extension(path, &content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Assembles the graph bottom-up, so every node is added after the nodes it references.
    pub fn build(&self) -> Result<Dag> {
        let mut resolver = Resolver {
            config: self,
            builder: DagBuilder::new(),
            ids: HashMap::new(),
            visiting: HashSet::new(),
        };
        let root = resolver.resolve(&self.root)?;
        let unused: Vec<&str> = self
            .nodes
            .keys()
            .filter(|name| !resolver.ids.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !unused.is_empty() {
            bail!("nodes not reachable from root `{}`: {}", self.root, unused.join(", "));
        }
        Ok(resolver.builder.build(root)?)
    }
}

struct Resolver<'c> {
    config: &'c DagConfig,
    builder: DagBuilder,
    ids: HashMap<&'c str, NodeId>,
    visiting: HashSet<&'c str>,
}

impl<'c> Resolver<'c> {
    fn resolve(&mut self, name: &'c str) -> Result<NodeId> {
        if let Some(id) = self.ids.get(name) {
            return Ok(*id);
        }
        let config = self.config;
        let (key, node) = config
            .nodes
            .get_key_value(name)
            .ok_or_else(|| anyhow!("unknown node `{name}`"))?;
        if !self.visiting.insert(key.as_str()) {
            bail!("cycle detected at node `{name}`");
        }

        let id = match node {
            NodeConfig::Task {
                instructions,
                output_label,
                children,
                evaluation_params,
                label,
            } => {
                let children = self.resolve_all(children)?;
                let mut task = TaskNode::new(instructions.as_str(), output_label.as_str(), children)
                    .evaluation_params(evaluation_params.iter().copied());
                task.label = label.clone();
                self.builder.add_task(task)
            }
            NodeConfig::BinaryJudgment {
                criteria,
                children,
                evaluation_params,
                label,
            } => {
                let children = self.resolve_all(children)?;
                let mut judgment = BinaryJudgmentNode::new(criteria.as_str(), children)
                    .evaluation_params(evaluation_params.iter().copied());
                judgment.label = label.clone();
                self.builder.add_binary_judgment(judgment)
            }
            NodeConfig::NonBinaryJudgment {
                criteria,
                children,
                evaluation_params,
                label,
            } => {
                let children = self.resolve_all(children)?;
                let mut judgment = NonBinaryJudgmentNode::new(criteria.as_str(), children)
                    .evaluation_params(evaluation_params.iter().copied());
                judgment.label = label.clone();
                self.builder.add_non_binary_judgment(judgment)
            }
            NodeConfig::Verdict {
                verdict,
                score,
                child,
                criteria,
            } => {
                let child = match (child, criteria) {
                    (Some(_), Some(_)) => bail!("verdict `{name}` can wrap a node or criteria, not both"),
                    (Some(child), None) => Some(VerdictChild::Node(self.resolve(child)?)),
                    (None, Some(criteria)) => Some(VerdictChild::Evaluator(Arc::new(criteria.metric()?))),
                    (None, None) => None,
                };
                VerdictNode::new(verdict.clone(), *score, child).and_then(|v| self.builder.add_verdict(v))
            }
        }
        .with_context(|| format!("invalid node `{name}`"))?;

        self.visiting.remove(key.as_str());
        self.ids.insert(key.as_str(), id);
        Ok(id)
    }

    fn resolve_all(&mut self, names: &'c [String]) -> Result<Vec<NodeId>> {
        names.iter().map(|n| self.resolve(n)).collect()
    }
}

/// Everything `dageval run --config` needs. Relative paths are resolved
/// against the directory of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub dag: PathBuf,
    pub data: PathBuf,
    pub model: ModelConfig,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub include_reason: bool,
    #[serde(default = "default_true")]
    pub async_mode: bool,
    #[serde(default)]
    pub strict_mode: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: f64,
}

fn default_name() -> String {
    "DAG".to_string()
}

fn default_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    8
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl EvalConfig {
    /// A config with every optional setting at its default.
    pub fn new(dag: impl Into<PathBuf>, data: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            dag: dag.into(),
            data: data.into(),
            model: ModelConfig {
                name: model.into(),
                base_url: default_base_url(),
                temperature: 0.0,
            },
            threshold: default_threshold(),
            include_reason: true,
            async_mode: true,
            strict_mode: false,
            concurrency: default_concurrency(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let mut config: Self = parse_by_extension(path, &content)?;
        if let Some(dir) = path.parent() {
            config.dag = dir.join(&config.dag);
            config.data = dir.join(&config.data);
        }
        Ok(config)
    }
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(content).with_context(|| format!("Invalid YAML in {:?}", path))
        }
        _ => serde_json::from_str(content).with_context(|| format!("Invalid JSON in {:?}", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::NodeKind;
    use std::io::Write;

    const SUMMARY_DAG: &str = r#"
root: extract
nodes:
  extract:
    type: task
    instructions: List the headings of the summary.
    output_label: Summary headings
    evaluation_params: [actual_output]
    children: [has_intro]
  has_intro:
    type: binary_judgment
    criteria: Is there an introduction heading?
    children: [intro_yes, intro_no]
  intro_yes: { type: verdict, verdict: true, child: order }
  intro_no: { type: verdict, verdict: false, score: 0 }
  order:
    type: non_binary_judgment
    criteria: Are the headings in order?
    children: [ordered, shuffled]
  ordered: { type: verdict, verdict: "yes", score: 10 }
  shuffled: { type: verdict, verdict: "no", score: 4 }
"#;

    #[test]
    fn builds_from_yaml() {
        let dag = DagConfig::from_yaml_str(SUMMARY_DAG).unwrap().build().unwrap();
        assert_eq!(dag.len(), 7);
        assert_eq!(dag.kind(dag.root()), Some(NodeKind::Task));
    }

    #[test]
    fn rejects_cycles() {
        let yaml = r#"
root: a
nodes:
  a: { type: binary_judgment, criteria: A?, children: [t, f] }
  t: { type: verdict, verdict: true, child: a }
  f: { type: verdict, verdict: false, score: 0 }
"#;
        let err = DagConfig::from_yaml_str(yaml).unwrap().build().unwrap_err();
        assert!(format!("{err:#}").contains("cycle detected"));
    }

    #[test]
    fn surfaces_shape_errors_with_node_name() {
        let yaml = r#"
root: j
nodes:
  j: { type: binary_judgment, criteria: J?, children: [t] }
  t: { type: verdict, verdict: true, score: 10 }
"#;
        let err = DagConfig::from_yaml_str(yaml).unwrap().build().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("invalid node `j`"));
        assert!(msg.contains("exactly 2 children"));
    }

    #[test]
    fn verdict_can_wrap_criteria() {
        let yaml = r#"
root: j
nodes:
  j: { type: binary_judgment, criteria: On topic?, children: [t, f] }
  t:
    type: verdict
    verdict: true
    criteria:
      name: Helpfulness
      steps: [Check the answer is actionable]
  f: { type: verdict, verdict: false, score: 0 }
"#;
        let dag = DagConfig::from_yaml_str(yaml).unwrap().build().unwrap();
        assert_eq!(dag.len(), 3);

        let both = yaml.replace("    criteria:\n", "    child: f\n    criteria:\n");
        let err = DagConfig::from_yaml_str(&both).unwrap().build().unwrap_err();
        assert!(format!("{err:#}").contains("not both"));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let yaml = r#"
root: j
nodes:
  j: { type: binary_judgment, criteria: J?, children: [t, f] }
  t: { type: verdict, verdict: true, score: 10 }
  f: { type: verdict, verdict: false, score: 0 }
  stray: { type: verdict, verdict: true, score: 3 }
"#;
        let err = DagConfig::from_yaml_str(yaml).unwrap().build().unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[test]
    fn eval_config_defaults_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "dag: dag.yaml\ndata: cases.jsonl\nmodel:\n  name: llama3").unwrap();

        let config = EvalConfig::from_path(&path).unwrap();
        assert_eq!(config.name, "DAG");
        assert_eq!(config.dag, dir.path().join("dag.yaml"));
        assert_eq!(config.model.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.threshold, 0.5);
        assert!(config.include_reason && config.async_mode && !config.strict_mode);
        assert_eq!(config.concurrency, 8);
    }
}
