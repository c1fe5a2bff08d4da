//! Prompt text for every LLM-facing node.
//!
//! The texts are embedded constants plus small builder functions; nodes never
//! concatenate prompt fragments themselves. Markers the parsers rely on
//! (`【PLAN】`, `【DONE】`, `Status:`, `RETRY`/`TERMINATE`) live here next to the
//! prose that instructs the model to emit them.

/// Marker opening a planned step.
pub const PLAN_MARKER: &str = "【PLAN】";
/// Marker declaring the task finished.
pub const DONE_MARKER: &str = "【DONE】";

/// Planner prompt for a fresh task starting on a blank/initial page.
pub fn planner_start_prompt(task: &str) -> String {
    format!(
        r#"You are a web automation planner.

[User task]
{task}

[Current state]
The browser just started and shows a blank or initial page.

Produce the FIRST step only, which is normally opening the target URL.

Reply format (exactly one step):
{PLAN_MARKER}
1. Open the URL https://...
"#
    )
}

/// Planner prompt for a new task that begins on an already-loaded page.
pub fn planner_continue_prompt(task: &str, current_url: &str, finished_steps: &str) -> String {
    format!(
        r#"You are a web automation planner. A page is already open; the user gave a new instruction that continues the current session.

[User task]
{task}

[Current URL]
{current_url}

[Steps already finished]
{finished_steps}

Produce the NEXT single step that advances the task from the current page.

Reply format (exactly one step):
{PLAN_MARKER}
1. <one atomic action>
"#
    )
}

/// Iterative planner prompt: one atomic step or termination.
pub fn planner_step_prompt(
    task: &str,
    current_url: &str,
    finished_steps: &str,
    suggestions: &str,
    reflections: &str,
    fail_directive: &str,
) -> String {
    format!(
        r#"You are a web automation planner working in iterative mode.

[Final user goal - keep it in mind]
{task}

[Current URL]
{current_url}

[Finished steps]
{finished_steps}

[Locator suggestions from page analysis]
{suggestions}
{reflections}{fail_directive}
Plan the NEXT action.

[Planning rules]
1. Atomic step: exactly ONE step per reply. "Click the link" is one step; "click and wait" is two.
2. Prefer locators from the suggestions over guessing.
3. Every step must visibly advance the final goal.
4. Only output {DONE_MARKER} when the goal is fully achieved (data saved, file written); navigation or clicking alone never completes a task.

Reply format for a next step:
{PLAN_MARKER}
1. <one atomic action with its locator>

Reply format when finished:
{DONE_MARKER}
<one line describing the final result>
"#
    )
}

/// Directive injected after two consecutive step failures.
pub fn fail_override_directive() -> String {
    "\n[Direction change required]\nThe current approach failed twice in a row. Abandon it: pick a different element, a different navigation path, or a different extraction strategy.\n".to_string()
}

/// Observer prompt: DOM analysis into locator strategies.
pub fn dom_analysis_prompt(task: &str, finished_steps: &str, current_url: &str, dom: &str) -> String {
    format!(
        r#"You are a web page analyst. Given a compressed DOM tree, propose locator strategies for the elements the task needs next.

[User task]
{task}

[Finished steps]
{finished_steps}

[Current URL]
{current_url}

[DOM skeleton]
{dom}

Reply with a JSON array only. Each element:
{{
  "locator": "<css selector or xpath>",
  "action_suggestion": "<click | input | extract | scroll>",
  "sub_locators": ["<optional child selectors for extraction>"],
  "opens_new_tab": false,
  "current_step_reasoning": "<why this element, one sentence>"
}}
"#
    )
}

/// Coder system prompt: the target automation dialect.
pub const CODER_SYSTEM_PROMPT: &str = r#"You are a browser automation coder. You write short Python-style programs against an already-connected tab object.

Available surface (nothing else exists):
- navigate(url)                     open a URL in the tab
- tab.query(selector)               first matching element or None
- tab.query_all(selector)           list of matching elements
- element.click()                   click an element
- element.input(text)               type into an element
- element.text                      visible text of an element
- element.attr(name)                attribute value
- tab.scroll_to_bottom()
- wait(seconds)
- results                           a pre-existing list; append extracted rows as dicts
- http_request(url, method, headers, params, data)
- download_file(url, path)
- db_insert(table, row)
- save_data(rows, path)             write rows to a json/csv file under the output directory
- clean_html(html)
- notify(message)

Rules:
1. Implement ONLY the step in the plan; never chain extra actions.
2. Use the locators given in the strategy JSON; do not invent selectors when one is provided.
3. Store extracted data by appending dicts to `results`, and persist with save_data when the plan says to save.
4. No imports, no function definitions, no tab construction; the tab already exists.
5. Output one fenced code block and nothing else."#;

/// Full coder prompt for one step.
pub fn coder_prompt(plan: &str, strategies_json: &str) -> String {
    format!(
        r#"[The only task - do exactly this and nothing else]
{plan}

[Locator strategies for the pages seen so far]
{strategies_json}

Write the program for this step."#
    )
}

/// Verifier prompt over the execution log tail.
pub fn verifier_prompt(task: &str, plan: &str, current_url: &str, log_tail: &str) -> String {
    format!(
        r#"You are an automation verifier. Judge whether the last step succeeded.

[User goal]
{task}

[Planned step]
{plan}

[Current URL]
{current_url}

[Execution log (tail)]
{log_tail}

[Judging principles]
1. Warnings are not failures: "Warning:", "failed to wait", "no new tab" are noise when the core action happened.
2. Judge the planned operation, not side effects.
3. Only errors that stop the task from continuing count as failure.
4. TaskDone is YES only when the user's final goal is visibly complete, not after a mere click or navigation.

Reply exactly in this format:
Status: [STEP_SUCCESS | STEP_FAIL]
TaskDone: [YES | NO]
Summary: [one line describing what actually happened]
"#
    )
}

/// Error-handler prompt: retry or terminate.
pub fn error_handler_prompt(error: &str, last_reflection: &str) -> String {
    format!(
        r#"The automation run hit a serious error.

[Error]
{error}

[Latest reflection]
{last_reflection}

Decide whether the task can be retried (after re-observing the page) or must be terminated.

Reply exactly in this format:
Status: [RETRY | TERMINATE]
Strategy: [one line of guidance]
"#
    )
}

/// Query-analyzer prompt grounded on the field registry listing.
pub fn query_analyzer_prompt(available_fields: &str, question: &str) -> String {
    format!(
        r#"You translate a question over a scraped knowledge base into retrieval parameters.

[Available metadata fields]
{available_fields}

[Question]
{question}

Reply with JSON only:
{{
  "filter_expr": "<boolean expression over available fields, or empty>",
  "search_query": "<semantic search keywords>",
  "sort_field": "<field name or empty>",
  "sort_order": "<asc | desc | empty>"
}}

Use only field names from the list above in filter_expr; leave it empty when unsure.
"#
    )
}

/// Answer-synthesis prompt over retrieved KB entries.
pub fn rag_answer_prompt(context: &str, question: &str) -> String {
    format!(
        r#"Answer the question using ONLY the knowledge-base entries below. Cite nothing that is not in them; say so when they don't contain the answer.

[Knowledge-base entries]
{context}

[Question]
{question}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the planner prompts embed the markers the parser scans for.
    #[test]
    fn markers_present() {
        assert!(planner_start_prompt("t").contains(PLAN_MARKER));
        let step = planner_step_prompt("t", "u", "(none)", "(none)", "", "");
        assert!(step.contains(PLAN_MARKER));
        assert!(step.contains(DONE_MARKER));
    }

    /// **Scenario**: builder output embeds every argument verbatim.
    #[test]
    fn arguments_embedded() {
        let p = verifier_prompt("goal-x", "plan-y", "https://u", "log-z");
        for needle in ["goal-x", "plan-y", "https://u", "log-z"] {
            assert!(p.contains(needle));
        }
        let p = dom_analysis_prompt("task-a", "step-b", "url-c", "dom-d");
        for needle in ["task-a", "step-b", "url-c", "dom-d"] {
            assert!(p.contains(needle));
        }
    }
}
