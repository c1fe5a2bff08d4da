//! Cache-lookup node: try to answer the plan from the code cache.
//!
//! A passing hit goes straight to the Executor with `code_source = cache`,
//! adapted by parameter substitution when the stored task differs from the
//! current one. The per-turn breaker, a disabled cache, or a trivial page all
//! fall through to the Coder.

use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::is_trivial_page;
use crate::cache::{apply_param_diffs, param_diffs, CodeCacheManager};
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::state::{AgentState, CodeSource, Field, StateUpdate};

use super::{ids, locator_summary};

pub struct CacheLookupNode {
    code_cache: Arc<CodeCacheManager>,
    enabled: bool,
}

impl CacheLookupNode {
    pub fn new(code_cache: Arc<CodeCacheManager>, enabled: bool) -> Self {
        Self { code_cache, enabled }
    }
}

#[async_trait]
impl Node<AgentState> for CacheLookupNode {
    fn id(&self) -> &'static str {
        ids::CACHE_LOOKUP
    }

    async fn run(
        &self,
        state: &AgentState,
        _config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let mut update = StateUpdate::new();

        if state.cache_failed_this_round {
            tracing::debug!("cache breaker set: bypassing retrieval this turn");
            return Ok((update, Goto::Node(ids::CODER)));
        }
        if !self.enabled || is_trivial_page(&state.current_url) {
            return Ok((update, Goto::Node(ids::CODER)));
        }

        let goal = state.plan.clone().unwrap_or_default();
        let locator_info = locator_summary(&state.locator_suggestions);
        let hits = self
            .code_cache
            .search(&goal, &locator_info, &state.user_task, &state.current_url)
            .await;

        let Some(best) = hits.into_iter().next() else {
            tracing::debug!("code cache miss");
            return Ok((update, Goto::Node(ids::CODER)));
        };

        let diffs = param_diffs(&best.user_task, &state.user_task);
        let code = if diffs.is_empty() {
            best.code
        } else {
            let (adapted, count) = apply_param_diffs(&best.code, &diffs);
            tracing::info!(hit = %best.id, substitutions = count, "cached code adapted");
            adapted
        };

        tracing::info!(hit = %best.id, score = best.score, "code cache hit");
        update.generated_code = Field::Set(Some(code));
        update.code_source = Field::Set(Some(CodeSource::Cache));
        update.cache_hit_id = Field::Set(Some(best.id));
        Ok((update, Goto::Node(ids::EXECUTOR)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CodeSaveRequest, FailureLog};
    use crate::embedding::MockEmbedder;
    use crate::vector::InMemoryBackend;
    use std::time::Duration;

    fn cache(dir: &std::path::Path) -> Arc<CodeCacheManager> {
        Arc::new(CodeCacheManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(MockEmbedder::new()),
            "code_cache",
            &[0.6, 0.2, 0.1, 0.1],
            0.90,
            0.90,
            3,
            Arc::new(FailureLog::new(dir.join("failures.jsonl"))),
        ))
    }

    const CODE: &str = "rows = tab.query_all(\".item\")\nfor r in rows:\n    results.append({\"t\": r.text})\nsave_data(results, \"items_10.json\")\nlimit = \"top 10\"\n";

    async fn seeded_cache(dir: &std::path::Path) -> Arc<CodeCacheManager> {
        let mgr = cache(dir);
        mgr.save(CodeSaveRequest {
            goal: "collect item titles from the listing".into(),
            user_task: "scrape top 10 items".into(),
            locator_info: "extract:.item".into(),
            url: "https://site.com/listing/1".into(),
            code: CODE.into(),
            dom_hash: "hash1".into(),
        })
        .await;
        mgr.drain(Duration::from_secs(1)).await;
        mgr
    }

    fn state_for(task: &str, plan: &str) -> AgentState {
        let mut state = AgentState::new(task);
        state.current_url = "https://site.com/listing/2".into();
        state.plan = Some(plan.into());
        state.locator_suggestions = vec![crate::state::StrategyEntry {
            page_context: "initial page".into(),
            url: state.current_url.clone(),
            strategies: vec![crate::state::LocatorStrategy {
                locator: ".item".into(),
                action_suggestion: "extract".into(),
                ..Default::default()
            }],
        }];
        state
    }

    /// **Scenario**: the breaker forces the Coder path regardless of the cache.
    #[tokio::test]
    async fn breaker_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let node = CacheLookupNode::new(seeded_cache(dir.path()).await, true);
        let mut state = state_for("scrape top 10 items", "collect item titles from the listing");
        state.cache_failed_this_round = true;

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::CODER));
        assert_eq!(update.code_source, Field::Keep, "breaker turn never claims cache");
    }

    /// **Scenario**: a passing hit routes straight to the Executor with the
    /// cached code and source markers.
    #[tokio::test]
    async fn hit_routes_to_executor() {
        let dir = tempfile::tempdir().unwrap();
        let node = CacheLookupNode::new(seeded_cache(dir.path()).await, true);
        let state = state_for("scrape top 10 items", "collect item titles from the listing");

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::EXECUTOR));
        assert_eq!(update.code_source, Field::Set(Some(CodeSource::Cache)));
        assert!(matches!(update.cache_hit_id, Field::Set(Some(_))));
        assert!(matches!(update.generated_code, Field::Set(Some(ref c)) if c.contains("query_all")));
    }

    /// **Scenario**: a different count in the task rewrites quoted parameters
    /// in the cached code ("10" → "25") without touching identifiers.
    #[tokio::test]
    async fn hit_with_param_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let node = CacheLookupNode::new(seeded_cache(dir.path()).await, true);
        let state = state_for("scrape top 25 items", "collect item titles from the listing");

        let (update, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::EXECUTOR));
        let Field::Set(Some(code)) = update.generated_code else {
            panic!("expected code");
        };
        assert!(code.contains("items_25.json"), "quoted literal rewritten: {code}");
        assert!(code.contains("top 25"));
        assert!(code.contains("query_all(\".item\")"), "selector untouched");
    }

    /// **Scenario**: a miss (or disabled cache, or trivial page) goes to Coder.
    #[tokio::test]
    async fn miss_disabled_and_trivial_route_to_coder() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = seeded_cache(dir.path()).await;

        let node = CacheLookupNode::new(Arc::clone(&mgr), true);
        let state = state_for("fill the signup form", "enter the email address");
        let (_, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::CODER));

        let node = CacheLookupNode::new(Arc::clone(&mgr), false);
        let state = state_for("scrape top 10 items", "collect item titles from the listing");
        let (_, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::CODER));

        let node = CacheLookupNode::new(mgr, true);
        let mut state = state_for("scrape top 10 items", "collect item titles from the listing");
        state.current_url = "about:blank".into();
        let (_, goto) = node.run(&state, &RunnableConfig::default()).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::CODER));
    }
}
