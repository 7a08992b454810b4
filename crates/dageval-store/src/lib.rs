use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use dageval_types::{EvalResult, EvalSummary};

/// SQLite history of evaluation runs: every case, every metric score, and
/// the verbose DAG log that produced it.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalEntity {
    pub id: i64,
    pub run_id: i64,
    pub name: String,
    pub summary: Option<EvalSummary>,
}

impl Store {
    /// Open a new store at the given path (e.g., "eval.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata TEXT
            );
            CREATE TABLE IF NOT EXISTS evals (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                summary TEXT,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            );
            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY,
                eval_id INTEGER NOT NULL,
                case_id TEXT,
                input TEXT NOT NULL,
                actual_output TEXT,
                expected_output TEXT,
                test_case TEXT NOT NULL,
                error TEXT,
                FOREIGN KEY(eval_id) REFERENCES evals(id)
            );
            CREATE TABLE IF NOT EXISTS scores (
                id INTEGER PRIMARY KEY,
                result_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                passed BOOLEAN NOT NULL,
                reason TEXT,
                evaluation_cost REAL NOT NULL DEFAULT 0,
                verbose_logs TEXT,
                details TEXT,
                FOREIGN KEY(result_id) REFERENCES results(id)
            );",
        )?;
        Ok(())
    }

    /// Create a new run entry
    pub fn create_run(&self, metadata: Option<serde_json::Value>) -> Result<i64> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO runs (created_at, metadata) VALUES (?1, ?2)",
            params![now.to_rfc3339(), metadata.map(|v| v.to_string())],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Save a full evaluation result into the database
    pub fn save_eval(&self, run_id: i64, name: &str, result: &EvalResult) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO evals (run_id, name, summary) VALUES (?1, ?2, ?3)",
            params![run_id, name, serde_json::to_string(&result.summary)?],
        )?;
        let eval_id = tx.last_insert_rowid();

        for cr in &result.cases {
            tx.execute(
                "INSERT INTO results (eval_id, case_id, input, actual_output, expected_output, test_case, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    eval_id,
                    cr.case.id,
                    cr.case.input,
                    cr.case.actual_output,
                    cr.case.expected_output,
                    serde_json::to_string(&cr.case)?,
                    cr.error
                ],
            )?;
            let result_id = tx.last_insert_rowid();

            for score in &cr.scores {
                tx.execute(
                    "INSERT INTO scores (result_id, name, value, passed, reason, evaluation_cost, verbose_logs, details)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        result_id,
                        score.name,
                        score.value,
                        score.passed,
                        score.reason,
                        score.evaluation_cost,
                        score.verbose_logs,
                        score.details.as_ref().map(|d| d.to_string())
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(eval_id)
    }

    /// Runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, created_at, metadata FROM runs ORDER BY id DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, created_at, metadata) = row?;
            runs.push(RunEntity {
                id,
                created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
                metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
            });
        }
        Ok(runs)
    }

    pub fn list_evals(&self, run_id: i64) -> Result<Vec<EvalEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, summary FROM evals WHERE run_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut evals = Vec::new();
        for row in rows {
            let (id, name, summary) = row?;
            evals.push(EvalEntity {
                id,
                run_id,
                name,
                summary: summary.map(|s| serde_json::from_str(&s)).transpose()?,
            });
        }
        Ok(evals)
    }

    /// Verbose logs recorded for one metric across an evaluation, keyed by case id.
    pub fn verbose_logs(&self, eval_id: i64, metric: &str) -> Result<Vec<(Option<String>, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.case_id, s.verbose_logs FROM scores s
             JOIN results r ON r.id = s.result_id
             WHERE r.eval_id = ?1 AND s.name = ?2 AND s.verbose_logs IS NOT NULL
             ORDER BY r.id",
        )?;
        let rows = stmt.query_map(params![eval_id, metric], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dageval_types::{CaseResult, Score, TestCase};

    fn result() -> EvalResult {
        let score = Score {
            name: "Correctness".into(),
            value: 1.0,
            passed: true,
            reason: Some("matches".into()),
            evaluation_cost: 0.25,
            verbose_logs: Some("| BinaryJudgmentNode | Level == 0 |".into()),
            details: None,
        };
        let cases = vec![
            CaseResult {
                case: TestCase::with_id("c1", "2+2?", "4"),
                error: None,
                scores: vec![score],
            },
            CaseResult {
                case: TestCase::with_id("c2", "3+3?", "7"),
                error: Some("agent offline".into()),
                scores: Vec::new(),
            },
        ];
        let summary = EvalResult::summarize(&cases);
        EvalResult { cases, summary }
    }

    #[test]
    fn saves_and_lists_runs() {
        let store = Store::open(":memory:").unwrap();
        let first = store.create_run(None).unwrap();
        let second = store.create_run(Some(serde_json::json!({"model": "llama3"}))).unwrap();
        let eval_id = store.save_eval(second, "Correctness", &result()).unwrap();

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(runs[0].metadata.as_ref().unwrap()["model"], "llama3");

        let evals = store.list_evals(second).unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].id, eval_id);
        let summary = evals[0].summary.as_ref().unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert!(store.list_evals(first).unwrap().is_empty());
    }

    #[test]
    fn keeps_verbose_logs_per_case() {
        let store = Store::open(":memory:").unwrap();
        let run = store.create_run(None).unwrap();
        let eval_id = store.save_eval(run, "Correctness", &result()).unwrap();

        let logs = store.verbose_logs(eval_id, "Correctness").unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].0.as_deref(), Some("c1"));
        assert!(logs[0].1.contains("Level == 0"));
    }
}
