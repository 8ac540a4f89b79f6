//! Preference resolution between records sharing a composite key.
//!
//! Rules are predicate expressions in the template language (e.g.
//! `status == 'active' && score > 10`). For each rule in declaration order the
//! candidates are tested from last to first; the first candidate satisfying a rule
//! wins. When no rule matches (or there are no rules), the last candidate wins.

use crate::error::{ShapeError, ShapeResult};
use crate::template::{Context, TemplateEngine};
use crate::value::{Record, Value};
use std::sync::Arc;

/// Read-only view of a candidate record as template variables.
struct Candidate<'a>(&'a Record);

impl Context for Candidate<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }
}

fn predicate(rule: &str) -> String {
    format!("[% IF ({rule}) %]1[% ELSE %]0[% END %]")
}

/// An ordered rule set bound to the engine that evaluates it.
#[derive(Clone)]
pub struct PreferenceResolver {
    engine: Arc<dyn TemplateEngine>,
    rules: Vec<String>,
    predicates: Vec<String>,
}

impl std::fmt::Debug for PreferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceResolver")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl PreferenceResolver {
    pub fn new(engine: Arc<dyn TemplateEngine>, rules: Vec<String>) -> Self {
        let predicates = rules.iter().map(|r| predicate(r)).collect();
        Self {
            engine,
            rules,
            predicates,
        }
    }

    /// The rules in declaration order.
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Whether any rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate one rule against one candidate.
    pub fn matches(&self, rule_index: usize, candidate: &Record) -> ShapeResult<bool> {
        let Some(src) = self.predicates.get(rule_index) else {
            return Err(ShapeError::usage(format!("no preference rule #{rule_index}")));
        };
        let out = self
            .engine
            .render(src, &mut Candidate(candidate))
            .map_err(|e| match e {
                ShapeError::Render(msg) => ShapeError::render(format!(
                    "preference rule '{}': {msg}",
                    self.rules[rule_index]
                )),
                other => other,
            })?;
        Ok(out.trim() == "1")
    }

    /// Index of the winning candidate.
    pub fn winner_index(&self, candidates: &[Record]) -> ShapeResult<usize> {
        let Some(last) = candidates.len().checked_sub(1) else {
            return Err(ShapeError::usage("preference resolution needs at least one candidate"));
        };

        for rule_index in 0..self.rules.len() {
            for (idx, candidate) in candidates.iter().enumerate().rev() {
                if self.matches(rule_index, candidate)? {
                    tracing::trace!(
                        target: "sqlshape.tree",
                        rule = %self.rules[rule_index],
                        candidate = idx,
                        "preference rule matched"
                    );
                    return Ok(idx);
                }
            }
        }
        Ok(last)
    }

    /// The candidate to keep. Always one of `candidates`.
    pub fn resolve<'c>(&self, candidates: &'c [Record]) -> ShapeResult<&'c Record> {
        let idx = self.winner_index(candidates)?;
        Ok(&candidates[idx])
    }
}

/// One-shot resolution without keeping a resolver around.
pub fn resolve<'c>(
    engine: Arc<dyn TemplateEngine>,
    rules: &[String],
    candidates: &'c [Record],
) -> ShapeResult<&'c Record> {
    PreferenceResolver::new(engine, rules.to_vec()).resolve(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Engine;
    use serde_json::json;

    fn resolver(rules: &[&str]) -> PreferenceResolver {
        PreferenceResolver::new(
            Arc::new(Engine::new()),
            rules.iter().map(|r| r.to_string()).collect(),
        )
    }

    fn records(values: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(values).unwrap()
    }

    #[test]
    fn no_rules_last_wins() {
        let candidates = records(json!([{"n": 1}, {"n": 2}]));
        assert_eq!(resolver(&[]).resolve(&candidates).unwrap()["n"], json!(2));
    }

    #[test]
    fn no_match_falls_back_to_last() {
        let candidates = records(json!([{"color": "blue"}, {"color": "green"}]));
        let winner = resolver(&["color == 'red'"]).resolve(&candidates).unwrap();
        assert_eq!(winner["color"], json!("green"));
    }

    #[test]
    fn earlier_rule_takes_precedence() {
        let candidates = records(json!([
            {"color": "blue", "smell": "good"},
            {"color": "green", "smell": "bad"}
        ]));
        let winner = resolver(&["color=='red'", "color=='green'", "smell=='good'"])
            .resolve(&candidates)
            .unwrap();
        assert_eq!(winner["color"], json!("green"));
        assert_eq!(winner["smell"], json!("bad"));
    }

    #[test]
    fn ties_within_a_rule_go_to_the_last_candidate() {
        let candidates = records(json!([
            {"place": "nowhere", "name": "A"},
            {"place": "nowhere", "name": "B"}
        ]));
        let winner = resolver(&["place=='nowhere'"]).resolve(&candidates).unwrap();
        assert_eq!(winner["name"], json!("B"));
    }

    #[test]
    fn first_candidate_can_win_by_rule() {
        let candidates = records(json!([{"v": 10}, {"v": 1}, {"v": 2}]));
        assert_eq!(resolver(&["v > 5"]).winner_index(&candidates).unwrap(), 0);
    }

    #[test]
    fn predicate_errors_propagate() {
        let candidates = records(json!([{"color": "red"}]));

        let err = resolver(&["undefined_field == 1"]).resolve(&candidates).unwrap_err();
        assert!(err.is_render());
        assert!(err.to_string().contains("undefined_field"));

        let err = resolver(&["color == "]).resolve(&candidates).unwrap_err();
        assert!(err.is_render());
    }

    #[test]
    fn empty_candidates_is_usage_error() {
        assert!(resolver(&[]).resolve(&[]).unwrap_err().is_usage());
    }
}
