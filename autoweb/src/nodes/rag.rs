//! RAG node: task-kinded dispatcher for knowledge work.
//!
//! `store_kb` ingests the most recent artifact under `output/**` into the KB
//! writer; `store_code` forwards the verified program to the code cache;
//! `qa` answers a question from the KB. Each dispatch clears the task kind and
//! leaves exactly one finished step describing what happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{dom_hash, CodeCacheManager, CodeSaveRequest};
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::kb::{KbItem, KbQuery, KnowledgeWriter};
use crate::prompts::{DONE_MARKER, PLAN_MARKER};
use crate::state::{AgentState, Field, RagTask, StateUpdate};

use super::{ids, locator_summary};

const ARTIFACT_EXTENSIONS: &[&str] = &["json", "jsonl", "csv", "sqlite", "db"];

pub struct RagNode {
    code_cache: Arc<CodeCacheManager>,
    kb_writer: Arc<KnowledgeWriter>,
    kb_query: Arc<KbQuery>,
    output_dir: PathBuf,
    done_marker: String,
}

/// Most recently modified data artifact under `output/**`.
fn latest_artifact(output_dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in walkdir::WalkDir::new(output_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !ARTIFACT_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            best = Some((modified, path.to_path_buf()));
        }
    }
    best.map(|(_, path)| path)
}

/// Parses an artifact into row objects.
fn parse_artifact(path: &Path) -> Result<Vec<Value>, AgentError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match ext.as_str() {
        "json" => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AgentError::failed(format!("read {}: {e}", path.display())))?;
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| AgentError::failed(format!("parse {}: {e}", path.display())))?;
            Ok(match value {
                Value::Array(rows) => rows,
                other => vec![other],
            })
        }
        "jsonl" => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| AgentError::failed(format!("read {}: {e}", path.display())))?;
            Ok(content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect())
        }
        "csv" => {
            let mut reader = csv::Reader::from_path(path)
                .map_err(|e| AgentError::failed(format!("open {}: {e}", path.display())))?;
            let headers = reader
                .headers()
                .map_err(|e| AgentError::failed(format!("csv headers: {e}")))?
                .clone();
            let mut rows = Vec::new();
            for record in reader.records().flatten() {
                let mut obj = serde_json::Map::new();
                for (name, field) in headers.iter().zip(record.iter()) {
                    obj.insert(name.to_string(), Value::String(field.to_string()));
                }
                rows.push(Value::Object(obj));
            }
            Ok(rows)
        }
        "sqlite" | "db" => parse_sqlite(path),
        other => Err(AgentError::failed(format!("unsupported artifact type: {other}"))),
    }
}

/// Reads every user table of a SQLite file into row objects.
fn parse_sqlite(path: &Path) -> Result<Vec<Value>, AgentError> {
    let conn = rusqlite::Connection::open(path)
        .map_err(|e| AgentError::failed(format!("open {}: {e}", path.display())))?;
    let mut tables = Vec::new();
    {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .map_err(|e| AgentError::failed(format!("sqlite tables: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AgentError::failed(format!("sqlite tables: {e}")))?;
        for name in names.flatten() {
            tables.push(name);
        }
    }

    let mut rows = Vec::new();
    for table in tables {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM \"{table}\""))
            .map_err(|e| AgentError::failed(format!("sqlite select: {e}")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mapped = stmt
            .query_map([], |row| {
                let mut obj = serde_json::Map::new();
                for (i, name) in columns.iter().enumerate() {
                    let value: rusqlite::types::Value = row.get(i)?;
                    let json = match value {
                        rusqlite::types::Value::Null => Value::Null,
                        rusqlite::types::Value::Integer(n) => Value::from(n),
                        rusqlite::types::Value::Real(f) => Value::from(f),
                        rusqlite::types::Value::Text(s) => Value::String(s),
                        rusqlite::types::Value::Blob(_) => Value::Null,
                    };
                    obj.insert(name.clone(), json);
                }
                Ok(Value::Object(obj))
            })
            .map_err(|e| AgentError::failed(format!("sqlite rows: {e}")))?;
        for row in mapped.flatten() {
            rows.push(row);
        }
    }
    Ok(rows)
}

impl RagNode {
    pub fn new(
        code_cache: Arc<CodeCacheManager>,
        kb_writer: Arc<KnowledgeWriter>,
        kb_query: Arc<KbQuery>,
        output_dir: impl Into<PathBuf>,
        done_marker: impl Into<String>,
    ) -> Self {
        Self {
            code_cache,
            kb_writer,
            kb_query,
            output_dir: output_dir.into(),
            done_marker: done_marker.into(),
        }
    }

    async fn store_kb(&self, state: &AgentState) -> String {
        let Some(path) = latest_artifact(&self.output_dir) else {
            return "No output artifact found to store into the knowledge base.".to_string();
        };
        let rows = match parse_artifact(&path) {
            Ok(rows) => rows,
            Err(e) => return format!("Knowledge base ingestion failed: {e}"),
        };
        let mut stored = 0usize;
        for row in rows {
            let item = match row {
                Value::Object(obj) => KbItem::Object(obj),
                Value::String(s) => KbItem::Text(s),
                other => KbItem::Text(other.to_string()),
            };
            match self.kb_writer.add(item, &state.current_url).await {
                Ok(n) => stored += n,
                Err(e) => tracing::warn!(error = %e, "kb add failed"),
            }
        }
        if let Err(e) = self.kb_writer.flush_and_wait(Duration::from_secs(10)).await {
            tracing::warn!(error = %e, "kb flush failed");
        }
        // The marker makes the write visible to the planner's DONE interception.
        let mut marker_cased = self.done_marker.clone();
        if let Some(first) = marker_cased.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        format!("{marker_cased}: {stored} rows from {}", path.display())
    }

    async fn store_code(&self, state: &AgentState) -> String {
        let code = state.generated_code.clone().unwrap_or_default();
        let submitted = self
            .code_cache
            .save(CodeSaveRequest {
                goal: state.plan.clone().unwrap_or_default(),
                user_task: state.user_task.clone(),
                locator_info: locator_summary(&state.locator_suggestions),
                url: state.current_url.clone(),
                code,
                dom_hash: state
                    .dom_hash
                    .clone()
                    .unwrap_or_else(|| dom_hash(state.dom_skeleton.as_deref().unwrap_or(""))),
            })
            .await;
        if submitted {
            "Cached the verified step program for reuse.".to_string()
        } else {
            "Step program not cached (navigation-only or duplicate).".to_string()
        }
    }

    async fn qa(&self, state: &AgentState) -> String {
        let question = state
            .plan
            .clone()
            .unwrap_or_default()
            .replace(PLAN_MARKER, "")
            .replace(DONE_MARKER, "")
            .trim()
            .to_string();
        match self.kb_query.answer(&question).await {
            Ok(answer) => format!("Knowledge base answer: {answer}"),
            Err(e) => format!("Knowledge base query failed: {e}"),
        }
    }
}

#[async_trait]
impl Node<AgentState> for RagNode {
    fn id(&self) -> &'static str {
        ids::RAG
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let mut update = StateUpdate::new();
        update.rag_task_type = Field::Set(None);

        let (step, goto) = match state.rag_task_type {
            Some(RagTask::StoreKb) => (self.store_kb(state).await, Goto::Node(ids::PLANNER)),
            Some(RagTask::StoreCode) => (self.store_code(state).await, Goto::Node(ids::OBSERVER)),
            Some(RagTask::Qa) => (self.qa(state).await, Goto::Node(ids::PLANNER)),
            None => (
                "No pending knowledge task.".to_string(),
                Goto::Node(ids::PLANNER),
            ),
        };
        tracing::info!(step = %step, "rag dispatch done");
        update = update.append_finished_step(step);
        Ok((update, goto))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FailureLog;
    use crate::embedding::MockEmbedder;
    use crate::kb::{FieldRegistry, JsonFileStore};
    use crate::llm::MockLlm;
    use crate::vector::{InMemoryBackend, VectorBackend};
    use serde_json::json;

    struct Fixture {
        node: RagNode,
        backend: Arc<InMemoryBackend>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let embedder = Arc::new(MockEmbedder::new());
        let registry = Arc::new(FieldRegistry::new(Box::new(JsonFileStore::new(
            dir.path().join("registry.json"),
        ))));
        let code_cache = Arc::new(CodeCacheManager::new(
            Arc::clone(&backend) as Arc<dyn crate::vector::VectorBackend>,
            Arc::clone(&embedder) as Arc<dyn crate::embedding::Embedder>,
            "code_cache",
            &[0.6, 0.2, 0.1, 0.1],
            0.90,
            0.90,
            3,
            Arc::new(FailureLog::new(dir.path().join("failures.jsonl"))),
        ));
        let kb_writer = Arc::new(KnowledgeWriter::new(
            Arc::clone(&backend) as Arc<dyn crate::vector::VectorBackend>,
            Arc::clone(&embedder) as Arc<dyn crate::embedding::Embedder>,
            Arc::clone(&registry),
            "kb",
        ));
        let kb_query = Arc::new(KbQuery::new(
            Arc::clone(&backend) as Arc<dyn crate::vector::VectorBackend>,
            embedder,
            registry,
            Arc::new(MockLlm::new([
                r#"{"search_query": "rows"}"#,
                "Answer: stored rows exist.",
            ])),
            "kb",
        ));
        let node = RagNode::new(
            code_cache,
            kb_writer,
            kb_query,
            dir.path().join("output"),
            "knowledge base updated",
        );
        Fixture { node, backend, dir }
    }

    /// **Scenario**: store_kb picks the newest artifact, ingests every row,
    /// flushes, clears the task kind, and leaves the done-marker step.
    #[tokio::test]
    async fn store_kb_ingests_latest_artifact() {
        let f = fixture();
        let out = f.dir.path().join("output/site.com");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("old.json"), "[{\"text\": \"old row\"}]").unwrap();
        std::fs::write(
            out.join("items.json"),
            serde_json::to_string(&json!([
                {"text": "row one", "rank": "1"},
                {"text": "row two", "rank": "2"}
            ]))
            .unwrap(),
        )
        .unwrap();
        // Make items.json strictly newer.
        let newer = std::time::SystemTime::now() + Duration::from_secs(5);
        let file = std::fs::File::options().append(true).open(out.join("items.json")).unwrap();
        file.set_modified(newer).unwrap();

        let mut state = AgentState::new("scrape and store in the knowledge base");
        state.rag_task_type = Some(RagTask::StoreKb);
        state.current_url = "https://site.com/list".into();

        let (update, goto) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        assert_eq!(update.rag_task_type, Field::Set(None));
        let Some(crate::state::ListPatch::Append(steps)) = update.finished_steps else {
            panic!("expected one finished step");
        };
        assert!(steps[0].starts_with("Knowledge base updated: 2 rows"), "{}", steps[0]);
        assert_eq!(f.backend.doc_count("kb"), 2);
    }

    /// **Scenario**: csv artifacts parse into one row per record.
    #[tokio::test]
    async fn store_kb_reads_csv() {
        let f = fixture();
        let out = f.dir.path().join("output");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("rows.csv"), "title,rank\nFirst film,1\nSecond film,2\n").unwrap();

        let mut state = AgentState::new("store");
        state.rag_task_type = Some(RagTask::StoreKb);
        let (_, _) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(f.backend.doc_count("kb"), 2);
    }

    /// **Scenario**: sqlite artifacts iterate user tables.
    #[tokio::test]
    async fn store_kb_reads_sqlite() {
        let f = fixture();
        let out = f.dir.path().join("output");
        std::fs::create_dir_all(&out).unwrap();
        let conn = rusqlite::Connection::open(out.join("data.sqlite")).unwrap();
        conn.execute("CREATE TABLE movies (title TEXT, descr TEXT)", []).unwrap();
        conn.execute(
            "INSERT INTO movies VALUES ('A', 'first movie row'), ('B', 'second movie row')",
            [],
        )
        .unwrap();
        drop(conn);

        let mut state = AgentState::new("store");
        state.rag_task_type = Some(RagTask::StoreKb);
        let (_, _) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(f.backend.doc_count("kb"), 2);
    }

    /// **Scenario**: store_kb without artifacts reports, routes to Planner.
    #[tokio::test]
    async fn store_kb_without_artifacts() {
        let f = fixture();
        let mut state = AgentState::new("store");
        state.rag_task_type = Some(RagTask::StoreKb);
        let (update, goto) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        let Some(crate::state::ListPatch::Append(steps)) = update.finished_steps else {
            panic!();
        };
        assert!(steps[0].contains("No output artifact"));
    }

    /// **Scenario**: store_code submits the program and routes to Observer.
    #[tokio::test]
    async fn store_code_submits() {
        let f = fixture();
        let mut state = AgentState::new("scrape rows");
        state.rag_task_type = Some(RagTask::StoreCode);
        state.plan = Some("1. Extract the rows".into());
        state.current_url = "https://site.com/list".into();
        state.dom_hash = Some("abc123".into());
        state.generated_code = Some(
            "rows = tab.query_all('.r')\nfor r in rows:\n    results.append(r.text)\nsave_data(results, 'x.json')\nn = 1".into(),
        );

        let (update, goto) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::OBSERVER));
        let Some(crate::state::ListPatch::Append(steps)) = update.finished_steps else {
            panic!();
        };
        assert!(steps[0].contains("Cached"));
    }

    /// **Scenario**: qa strips the plan marker and answers from the KB.
    #[tokio::test]
    async fn qa_answers() {
        let f = fixture();
        f.backend
            .create_collection(&crate::vector::CollectionSchema {
                name: "kb".into(),
                fields: vec![],
                scalar_indexes: vec![],
            })
            .await
            .unwrap();
        let mut state = AgentState::new("ask");
        state.rag_task_type = Some(RagTask::Qa);
        state.plan = Some(format!("{PLAN_MARKER}\nwhat rows are stored?"));

        let (update, goto) = f.node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        let Some(crate::state::ListPatch::Append(steps)) = update.finished_steps else {
            panic!();
        };
        assert!(steps[0].starts_with("Knowledge base"));
    }
}
