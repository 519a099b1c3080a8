//! Reference Rule Evaluator
//!
//! Evaluates a request against an ordered rule collection the way a host
//! content-blocking engine does: every matching rule is visited top to
//! bottom, `ignore-previous-rules` discards whatever earlier rules decided,
//! and the state left after the last rule is the outcome.
//!
//! Used to validate compiled artifacts and to check shard precedence.

use regex::{Regex, RegexBuilder};

use crate::types::{Action, MatchDecision, MatchResult, RequestContext, Rule};
use crate::url::host_matches_domain_entry;

/// Error raised when a rule's url-filter is not a valid expression.
#[derive(Debug, thiserror::Error)]
#[error("Invalid url-filter in rule {index}: {source}")]
pub struct MatcherError {
    pub index: usize,
    #[source]
    pub source: regex::Error,
}

struct CompiledEntry {
    rule: Rule,
    regex: Regex,
}

// =============================================================================
// Matcher
// =============================================================================

/// Compiled view of an ordered rule collection.
pub struct Matcher {
    entries: Vec<CompiledEntry>,
}

impl Matcher {
    /// Compile every url-filter. Matching is case-insensitive, as in the
    /// host engine's default.
    pub fn new(rules: &[Rule]) -> Result<Self, MatcherError> {
        let entries = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                RegexBuilder::new(&rule.trigger.url_pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| CompiledEntry { rule: rule.clone(), regex })
                    .map_err(|source| MatcherError { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match a request and return the decision.
    pub fn match_request(&self, ctx: &RequestContext<'_>) -> MatchResult {
        let mut result = MatchResult::default();

        for (index, entry) in self.entries.iter().enumerate() {
            if !self.trigger_applies(entry, ctx) {
                continue;
            }

            match &entry.rule.action {
                Action::Block => {
                    result.decision = MatchDecision::Block;
                    result.rule_index = Some(index);
                }
                Action::CssHide { selector } => {
                    result.hidden_selectors.push(selector.clone());
                }
                Action::MakeHttps => {
                    result.upgrade_https = true;
                }
                Action::IgnorePreviousRules => {
                    result = MatchResult {
                        rule_index: Some(index),
                        ..MatchResult::default()
                    };
                }
            }
        }

        result
    }

    fn trigger_applies(&self, entry: &CompiledEntry, ctx: &RequestContext<'_>) -> bool {
        let trigger = &entry.rule.trigger;

        if !trigger.resource_types.covers(ctx.resource_type) {
            return false;
        }

        if let Some(domains) = &trigger.if_domains {
            if !domains.iter().any(|d| host_matches_domain_entry(ctx.page_host, d)) {
                return false;
            }
        }

        if let Some(domains) = &trigger.unless_domains {
            if domains.iter().any(|d| host_matches_domain_entry(ctx.page_host, d)) {
                return false;
            }
        }

        entry.regex.is_match(ctx.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceType, Trigger};

    fn ctx<'a>(url: &'a str, page_host: &'a str, ty: ResourceType) -> RequestContext<'a> {
        RequestContext { url, page_host, resource_type: ty }
    }

    #[test]
    fn later_exception_overrides_block() {
        let rules = vec![
            Rule::block(Trigger::url(".*tracker\\.net.*")),
            Rule::exception(Trigger {
                if_domains: Some(vec!["*news.org".to_string()]),
                ..Trigger::url(".*")
            }),
        ];
        let matcher = Matcher::new(&rules).expect("compile");

        let blocked = matcher.match_request(&ctx("https://tracker.net/p.js", "shop.com", ResourceType::SCRIPT));
        assert_eq!(blocked.decision, MatchDecision::Block);
        assert_eq!(blocked.rule_index, Some(0));

        let allowed = matcher.match_request(&ctx("https://tracker.net/p.js", "www.news.org", ResourceType::SCRIPT));
        assert_eq!(allowed.decision, MatchDecision::Allow);
        assert_eq!(allowed.rule_index, Some(1));
    }

    #[test]
    fn exception_before_block_does_not_override() {
        let rules = vec![
            Rule::exception(Trigger::url(".*")),
            Rule::block(Trigger::url(".*tracker\\.net.*")),
        ];
        let matcher = Matcher::new(&rules).expect("compile");
        let result = matcher.match_request(&ctx("https://tracker.net/", "a.com", ResourceType::IMAGE));
        assert_eq!(result.decision, MatchDecision::Block);
    }

    #[test]
    fn respects_resource_types_and_unless_domain() {
        let mut trigger = Trigger::url("ads");
        trigger.resource_types = ResourceType::SCRIPT;
        trigger.unless_domains = Some(vec!["safe.com".to_string()]);
        let matcher = Matcher::new(&[Rule::block(trigger)]).expect("compile");

        assert_eq!(
            matcher.match_request(&ctx("https://x.com/ADS.js", "a.com", ResourceType::SCRIPT)).decision,
            MatchDecision::Block
        );
        assert_eq!(
            matcher.match_request(&ctx("https://x.com/ads.png", "a.com", ResourceType::IMAGE)).decision,
            MatchDecision::Allow
        );
        assert_eq!(
            matcher.match_request(&ctx("https://x.com/ads.js", "safe.com", ResourceType::SCRIPT)).decision,
            MatchDecision::Allow
        );
    }

    #[test]
    fn collects_selectors_until_exception() {
        let rules = vec![
            Rule::css_hide(Trigger::url(".*"), ".banner"),
            Rule::css_hide(Trigger::url(".*"), ".sidebar-ad"),
        ];
        let matcher = Matcher::new(&rules).expect("compile");
        let result = matcher.match_request(&ctx("https://a.com/", "a.com", ResourceType::DOCUMENT));
        assert_eq!(result.hidden_selectors, vec![".banner", ".sidebar-ad"]);
    }

    #[test]
    fn reports_invalid_pattern_index() {
        let rules = vec![Rule::block(Trigger::url("ok")), Rule::block(Trigger::url("(unclosed"))];
        let err = Matcher::new(&rules).err().expect("should fail");
        assert_eq!(err.index, 1);
    }
}
