use std::collections::HashSet;

use tg_core::types::Rule;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Remove exact duplicate rules, keeping the first occurrence.
///
/// Exception rules are left untouched: their position relative to the
/// blocking rules is what gives them precedence.
pub fn optimize_rules(rules: &mut Vec<Rule>) -> OptimizeStats {
    let before = rules.len();

    let mut seen: HashSet<Rule> = HashSet::with_capacity(rules.len());
    let mut deduped = 0usize;
    rules.retain(|rule| {
        if rule.is_exception() {
            return true;
        }
        if seen.contains(rule) {
            deduped += 1;
            false
        } else {
            seen.insert(rule.clone());
            true
        }
    });

    OptimizeStats {
        before,
        after: rules.len(),
        deduped,
    }
}
