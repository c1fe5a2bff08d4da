//! Parameter-aware substitution for cached code.
//!
//! A cached program written for "scrape top 10 items" is reusable for
//! "scrape top 25 items" by rewriting only the parameters that differ between
//! the two task texts, and only where parameters can legally live: inside
//! quoted string literals. Identifiers and comments stay byte-identical.

use regex::Regex;

/// One `old → new` replacement discovered by the task diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamDiff {
    pub old: String,
    pub new: String,
}

/// Tokenizes into alphanumeric runs and single non-space characters.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            run.push(c);
        } else {
            if !run.is_empty() {
                tokens.push(std::mem::take(&mut run));
            }
            if !c.is_whitespace() {
                tokens.push(c.to_string());
            }
        }
    }
    if !run.is_empty() {
        tokens.push(run);
    }
    tokens
}

/// LCS table over token slices.
fn lcs(a: &[String], b: &[String]) -> Vec<Vec<usize>> {
    let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    table
}

enum Step {
    Equal,
    Delete(String),
    Insert(String),
}

/// Walks the LCS table into per-token steps, then groups the delete/insert runs
/// between equal tokens into contiguous replace regions.
fn replace_ops(a: &[String], b: &[String]) -> Vec<(Vec<String>, Vec<String>)> {
    let table = lcs(a, b);
    let mut steps = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            steps.push(Step::Equal);
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            steps.push(Step::Delete(a[i].clone()));
            i += 1;
        } else {
            steps.push(Step::Insert(b[j].clone()));
            j += 1;
        }
    }
    steps.extend(a[i..].iter().cloned().map(Step::Delete));
    steps.extend(b[j..].iter().cloned().map(Step::Insert));

    let mut ops = Vec::new();
    let mut removed = Vec::new();
    let mut inserted = Vec::new();
    for step in steps {
        match step {
            Step::Equal => {
                if !removed.is_empty() || !inserted.is_empty() {
                    ops.push((std::mem::take(&mut removed), std::mem::take(&mut inserted)));
                }
            }
            Step::Delete(token) => removed.push(token),
            Step::Insert(token) => inserted.push(token),
        }
    }
    if !removed.is_empty() || !inserted.is_empty() {
        ops.push((removed, inserted));
    }
    ops
}

/// Computes `old → new` replacements between the stored task and the current
/// task. Only genuine replace operations (both sides non-empty) whose old and
/// new strings are each at least 2 chars survive. Sorted by old-length
/// descending so longer parameters are applied before their substrings.
pub fn param_diffs(stored_task: &str, current_task: &str) -> Vec<ParamDiff> {
    let a = tokenize(stored_task);
    let b = tokenize(current_task);
    let mut diffs: Vec<ParamDiff> = replace_ops(&a, &b)
        .into_iter()
        .filter(|(removed, inserted)| !removed.is_empty() && !inserted.is_empty())
        .map(|(removed, inserted)| ParamDiff {
            old: removed.join(""),
            new: inserted.join(""),
        })
        .filter(|d| d.old.chars().count() >= 2 && d.new.chars().count() >= 2 && d.old != d.new)
        .collect();
    diffs.sort_by(|x, y| y.old.len().cmp(&x.old.len()));
    diffs.dedup();
    diffs
}

/// Applies diffs to `code`, but only inside quoted string literals
/// (single or double quotes). Everything outside quoted spans is untouched.
/// Returns the rewritten code and the number of substitutions made.
pub fn apply_param_diffs(code: &str, diffs: &[ParamDiff]) -> (String, usize) {
    if diffs.is_empty() {
        return (code.to_string(), 0);
    }
    // Non-greedy quoted spans; backslash escapes respected for double quotes.
    let literal = Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#)
        .expect("quoted-literal pattern is valid");
    let mut total = 0usize;
    let rewritten = literal.replace_all(code, |caps: &regex::Captures<'_>| {
        let span = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let mut inner = span.to_string();
        for diff in diffs {
            if inner.contains(&diff.old) {
                total += inner.matches(&diff.old).count();
                inner = inner.replace(&diff.old, &diff.new);
            }
        }
        inner
    });
    if total > 0 {
        tracing::info!(substitutions = total, "cached code adapted via param diff");
    }
    (rewritten.into_owned(), total)
}
