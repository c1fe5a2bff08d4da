//! Observer node: perceive the current page.
//!
//! Captures the DOM skeleton, detects change via `dom_hash`, and produces
//! locator strategies — from the DOM cache when a gated hit exists, otherwise
//! from the analysis LLM (whose fresh result is submitted back to the cache).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{capture_dom_skeleton, is_trivial_page};
use crate::cache::{dom_hash, DomCacheManager};
use crate::error::AgentError;
use crate::graph::{Goto, Node, RunnableConfig};
use crate::llm::LlmClient;
use crate::message::Message;
use crate::prompts;
use crate::salvage::salvage_object_list;
use crate::state::{
    AgentState, Field, ListPatch, LocatorStrategy, ObserverSource, StateUpdate, StrategyEntry,
};

use super::{finished_steps_block, ids};

/// Analysis prompt DOM budget.
const DOM_PROMPT_MAX: usize = 30000;

pub struct ObserverNode {
    llm: Arc<dyn LlmClient>,
    dom_cache: Arc<DomCacheManager>,
    dom_cache_enabled: bool,
}

impl ObserverNode {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dom_cache: Arc<DomCacheManager>,
        dom_cache_enabled: bool,
    ) -> Self {
        Self {
            llm,
            dom_cache,
            dom_cache_enabled,
        }
    }

    fn page_context(state: &AgentState) -> String {
        state
            .finished_steps
            .last()
            .cloned()
            .unwrap_or_else(|| "initial page".to_string())
    }

    async fn analyze_with_llm(
        &self,
        state: &AgentState,
        url: &str,
        dom: &str,
    ) -> Result<Vec<LocatorStrategy>, AgentError> {
        let dom_view: String = dom.chars().take(DOM_PROMPT_MAX).collect();
        let prompt = prompts::dom_analysis_prompt(
            &state.user_task,
            &finished_steps_block(&state.finished_steps),
            url,
            &dom_view,
        );
        let response = self.llm.invoke(&[Message::user(prompt)]).await?;
        let objects = salvage_object_list(&response.content)?;
        let strategies = objects
            .into_iter()
            .filter_map(|obj| serde_json::from_value(serde_json::Value::Object(obj)).ok())
            .collect::<Vec<LocatorStrategy>>();
        Ok(strategies)
    }
}

#[async_trait]
impl Node<AgentState> for ObserverNode {
    fn id(&self) -> &'static str {
        ids::OBSERVER
    }

    async fn run(
        &self,
        state: &AgentState,
        config: &RunnableConfig,
    ) -> Result<(StateUpdate, Goto), AgentError> {
        let tab = config
            .tab
            .as_ref()
            .ok_or_else(|| AgentError::MissingDependency("browser tab".into()))?;

        let _ = tab.wait_for_load(Duration::from_secs(3)).await;
        let url = tab.url().await.unwrap_or_default();

        let mut update = StateUpdate::new().current_url(url.clone());

        if is_trivial_page(&url) {
            tracing::debug!(url = %url, "trivial page: skipping analysis");
            return Ok((update, Goto::Node(ids::PLANNER)));
        }

        let dom = capture_dom_skeleton(tab.as_ref()).await;
        let hash = dom_hash(&dom);
        let changed = state.dom_hash.as_deref() != Some(hash.as_str());
        let prior_failed = state.error_type.is_some()
            || state
                .verification_result
                .as_ref()
                .map(|v| !v.is_success)
                .unwrap_or(false);

        // A failed step after a DOM-cache hit is evidence against that row.
        if prior_failed {
            if let Some(hit_id) = &state.dom_cache_hit_id {
                self.dom_cache
                    .record_failure(hit_id, "step failed after dom-cache suggestions");
            }
        }

        if changed || prior_failed {
            let mut strategies_from_cache = None;
            if self.dom_cache_enabled {
                let hits = self.dom_cache.search(&state.user_task, &url, &dom).await;
                if let Some(best) = hits.into_iter().next() {
                    if !best.locator_suggestions.is_empty() {
                        strategies_from_cache = Some((best.id, best.locator_suggestions));
                    }
                }
            }

            match strategies_from_cache {
                Some((hit_id, strategies)) => {
                    tracing::info!(hit_id = %hit_id, count = strategies.len(), "locator strategies from dom cache");
                    update.locator_suggestions = Some(ListPatch::Append(vec![StrategyEntry {
                        page_context: Self::page_context(state),
                        url: url.clone(),
                        strategies,
                    }]));
                    update.observer_source = Field::Set(Some(ObserverSource::DomCache));
                    update.dom_cache_hit_id = Field::Set(Some(hit_id));
                }
                None => {
                    let strategies = match self.analyze_with_llm(state, &url, &dom).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::warn!(error = %e, "dom analysis failed");
                            Vec::new()
                        }
                    };
                    if !strategies.is_empty() && self.dom_cache_enabled {
                        // Fresh analysis feeds the cache for the next session.
                        self.dom_cache
                            .save(&state.user_task, &url, &dom, &strategies)
                            .await;
                    }
                    tracing::info!(count = strategies.len(), "locator strategies from analysis");
                    update.locator_suggestions = Some(ListPatch::Append(vec![StrategyEntry {
                        page_context: Self::page_context(state),
                        url: url.clone(),
                        strategies,
                    }]));
                    update.observer_source = Field::Set(Some(ObserverSource::Llm));
                    update.dom_cache_hit_id = Field::Set(None);
                }
            }
        } else {
            tracing::debug!("dom unchanged: reusing accumulated strategies");
        }

        update.dom_skeleton = Field::Set(Some(dom));
        update.dom_hash = Field::Set(Some(hash));
        Ok((update, Goto::Node(ids::PLANNER)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockTab;
    use crate::cache::FailureLog;
    use crate::embedding::MockEmbedder;
    use crate::llm::MockLlm;
    use crate::vector::InMemoryBackend;

    fn dom_cache(dir: &std::path::Path) -> Arc<DomCacheManager> {
        Arc::new(DomCacheManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(MockEmbedder::new()),
            "dom_cache",
            &[0.2, 0.7, 0.1],
            0.90,
            0.8,
            168,
            3,
            Arc::new(FailureLog::new(dir.join("failures.jsonl"))),
        ))
    }

    fn config_with(tab: MockTab) -> RunnableConfig {
        RunnableConfig::default().with_tab(Arc::new(tab))
    }

    const STRATEGY_JSON: &str =
        r#"[{"locator": ".item", "action_suggestion": "extract", "current_step_reasoning": "list"}]"#;

    /// **Scenario**: a trivial page skips capture and analysis entirely.
    #[tokio::test]
    async fn trivial_page_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new([STRATEGY_JSON]));
        let node = ObserverNode::new(llm.clone(), dom_cache(dir.path()), true);
        let config = config_with(MockTab::new("about:blank"));

        let (update, goto) = node.run(&AgentState::new("task"), &config).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        assert!(update.locator_suggestions.is_none());
        assert!(llm.prompts.lock().unwrap().is_empty(), "no llm call");
    }

    /// **Scenario**: a changed DOM triggers analysis; strategies append and the
    /// hash updates; source marks the LLM path.
    #[tokio::test]
    async fn changed_dom_analyzed() {
        let dir = tempfile::tempdir().unwrap();
        let node = ObserverNode::new(
            Arc::new(MockLlm::new([STRATEGY_JSON])),
            dom_cache(dir.path()),
            true,
        );
        let tab = MockTab::new("https://site.com/list");
        tab.set_dom(r#"{"t":"ul","kids":[{"t":"li","txt":"Movie"}]}"#);
        let config = config_with(tab);

        let (update, goto) = node.run(&AgentState::new("collect titles"), &config).await.unwrap();
        assert_eq!(goto, Goto::Node(ids::PLANNER));
        let Some(ListPatch::Append(entries)) = update.locator_suggestions else {
            panic!("expected appended strategies");
        };
        assert_eq!(entries[0].strategies[0].locator, ".item");
        assert_eq!(update.observer_source, Field::Set(Some(ObserverSource::Llm)));
        assert!(matches!(update.dom_hash, Field::Set(Some(_))));
    }

    /// **Scenario**: an unchanged DOM with a successful prior step skips
    /// re-analysis.
    #[tokio::test]
    async fn unchanged_dom_skips_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new([STRATEGY_JSON]));
        let node = ObserverNode::new(llm.clone(), dom_cache(dir.path()), true);
        let tab = MockTab::new("https://site.com/list");
        tab.set_dom(r#"{"t":"ul"}"#);
        let config = config_with(tab);

        let mut state = AgentState::new("collect titles");
        state.dom_hash = Some(dom_hash(r#"{"t":"ul"}"#));

        let (update, _) = node.run(&state, &config).await.unwrap();
        assert!(update.locator_suggestions.is_none());
        assert!(llm.prompts.lock().unwrap().is_empty());
    }

    /// **Scenario**: a prior failure forces re-analysis even with an unchanged
    /// DOM, and audits the previous DOM-cache hit.
    #[tokio::test]
    async fn failure_forces_reanalysis_and_audit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dom_cache(dir.path());
        let llm = Arc::new(MockLlm::new([STRATEGY_JSON]));
        let node = ObserverNode::new(llm.clone(), Arc::clone(&cache), true);
        let tab = MockTab::new("https://site.com/list");
        tab.set_dom(r#"{"t":"ul"}"#);
        let config = config_with(tab);

        let mut state = AgentState::new("collect titles");
        state.dom_hash = Some(dom_hash(r#"{"t":"ul"}"#));
        state.dom_cache_hit_id = Some("old_hit".into());
        state.verification_result = Some(crate::state::VerificationResult {
            is_success: false,
            is_done: false,
            summary: "failed".into(),
        });

        let (update, _) = node.run(&state, &config).await.unwrap();
        assert!(update.locator_suggestions.is_some(), "failure invalidates reuse");
        let audit = std::fs::read_to_string(dir.path().join("failures.jsonl")).unwrap();
        assert!(audit.contains("old_hit"));
    }

    /// **Scenario**: a gated DOM-cache hit supplies strategies without an LLM
    /// call and records its hit id.
    #[tokio::test]
    async fn dom_cache_hit_bypasses_llm() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dom_cache(dir.path());
        let dom = r#"{"t":"ul","kids":[{"t":"li","txt":"Movie"}]}"#;
        cache
            .save(
                "collect titles",
                "https://site.com/list",
                dom,
                &[LocatorStrategy {
                    locator: ".cached".into(),
                    action_suggestion: "extract".into(),
                    ..Default::default()
                }],
            )
            .await;
        cache.drain(Duration::from_secs(1)).await;

        let llm = Arc::new(MockLlm::new([STRATEGY_JSON]));
        let node = ObserverNode::new(llm.clone(), cache, true);
        let tab = MockTab::new("https://site.com/list");
        tab.set_dom(dom);
        let config = config_with(tab);

        let (update, _) = node.run(&AgentState::new("collect titles"), &config).await.unwrap();
        let Some(ListPatch::Append(entries)) = update.locator_suggestions else {
            panic!("expected strategies");
        };
        assert_eq!(entries[0].strategies[0].locator, ".cached");
        assert_eq!(
            update.observer_source,
            Field::Set(Some(ObserverSource::DomCache))
        );
        assert!(matches!(update.dom_cache_hit_id, Field::Set(Some(_))));
        assert!(llm.prompts.lock().unwrap().is_empty(), "cache hit must bypass llm");
    }
}
