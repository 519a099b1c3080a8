//! Rule collection assembly
//!
//! The output order is part of the contract with the host engine:
//!
//! 1. built-in blocking rules
//! 2. each available list, in list order
//! 3. exception rules for whitelisted sites (optional)
//! 4. site-specific exception rules
//!
//! Exceptions only override rules that precede them, so they always go last.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use tg_core::schema::{rules_to_json, SchemaError};
use tg_core::types::Rule;

use crate::builtin::{builtin_rules, exception_rules, minimal_rules, whitelist_exception};
use crate::optimizer::optimize_rules;
use crate::parser::{parse_filter_list, DEFAULT_MAX_RULES_PER_LIST};

/// Text of one enabled filter list. `text` is `None` when the list could not
/// be fetched; such lists are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListText {
    pub list_id: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub max_rules_per_list: usize,
    /// Emit an `ignore-previous-rules` rule for every excluded domain
    pub whitelist_exception_rules: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_rules_per_list: DEFAULT_MAX_RULES_PER_LIST,
            whitelist_exception_rules: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListReport {
    pub list_id: String,
    pub rules: usize,
    pub rejected: usize,
    pub truncated: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub builtin: usize,
    pub lists: Vec<ListReport>,
    pub whitelist_exceptions: usize,
    pub site_exceptions: usize,
    pub deduped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledRules {
    pub rules: Vec<Rule>,
    pub report: CompileReport,
}

impl CompiledRules {
    pub fn to_json(&self) -> Result<String, SchemaError> {
        rules_to_json(&self.rules)
    }

    pub fn exception_count(&self) -> usize {
        self.rules.iter().filter(|r| r.is_exception()).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    options: CompileOptions,
}

impl RuleCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Assemble the ordered rule collection. Never returns an empty
    /// collection: built-ins and site exceptions are always present.
    pub fn compile(&self, lists: &[ListText], excluded: &BTreeSet<String>) -> CompiledRules {
        let mut report = CompileReport::default();

        let mut blocking = builtin_rules(excluded);
        report.builtin = blocking.len();

        for list in lists {
            let Some(text) = &list.text else {
                warn!("filter list '{}' unavailable, skipping", list.list_id);
                report.lists.push(ListReport {
                    list_id: list.list_id.clone(),
                    rules: 0,
                    rejected: 0,
                    truncated: false,
                    skipped: true,
                });
                continue;
            };

            let parsed = parse_filter_list(text, excluded, self.options.max_rules_per_list);
            debug!(
                "list '{}': {} rules, {} rejected",
                list.list_id,
                parsed.rules.len(),
                parsed.rejected
            );
            if parsed.truncated {
                info!(
                    "list '{}' truncated at {} rules",
                    list.list_id, self.options.max_rules_per_list
                );
            }
            report.lists.push(ListReport {
                list_id: list.list_id.clone(),
                rules: parsed.rules.len(),
                rejected: parsed.rejected,
                truncated: parsed.truncated,
                skipped: false,
            });
            blocking.extend(parsed.rules);
        }

        report.deduped = optimize_rules(&mut blocking).deduped;

        let mut rules = blocking;
        if self.options.whitelist_exception_rules {
            let before = rules.len();
            rules.extend(excluded.iter().map(|domain| whitelist_exception(domain)));
            report.whitelist_exceptions = rules.len() - before;
        }

        let site = exception_rules();
        report.site_exceptions = site.len();
        rules.extend(site);

        info!(
            "compiled {} rules ({} built-in, {} lists, {} exceptions)",
            rules.len(),
            report.builtin,
            report.lists.iter().filter(|l| !l.skipped).count(),
            report.whitelist_exceptions + report.site_exceptions
        );

        CompiledRules { rules, report }
    }

    /// The fallback collection: a handful of blocking rules plus the site
    /// exceptions.
    pub fn compile_minimal(&self, excluded: &BTreeSet<String>) -> Vec<Rule> {
        let mut rules = minimal_rules(excluded);
        rules.extend(exception_rules());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{BUILTIN_FILTERS, EXCEPTION_PAGE_DOMAINS, EXCEPTION_URL_PATTERNS};
    use tg_core::types::Action;

    fn site_exception_count() -> usize {
        EXCEPTION_PAGE_DOMAINS.len() + EXCEPTION_URL_PATTERNS.len()
    }

    fn list(id: &str, text: &str) -> ListText {
        ListText { list_id: id.to_string(), text: Some(text.to_string()) }
    }

    #[test]
    fn no_lists_still_yields_builtins_and_exceptions() {
        let compiled = RuleCompiler::default().compile(&[], &BTreeSet::new());
        assert_eq!(compiled.rules.len(), BUILTIN_FILTERS.len() + site_exception_count());
        assert_eq!(compiled.exception_count(), site_exception_count());
    }

    #[test]
    fn orders_builtins_lists_then_exceptions() {
        let lists = vec![list("one", "||first.com^"), list("two", "||second.com^")];
        let compiled = RuleCompiler::default().compile(&lists, &BTreeSet::new());
        let rules = &compiled.rules;

        let first = rules.iter().position(|r| r.trigger.url_pattern.contains("first")).unwrap();
        let second = rules.iter().position(|r| r.trigger.url_pattern.contains("second")).unwrap();
        let first_exception = rules.iter().position(Rule::is_exception).unwrap();

        assert_eq!(first, BUILTIN_FILTERS.len());
        assert_eq!(second, first + 1);
        assert_eq!(first_exception, second + 1);
        assert!(rules[first_exception..].iter().all(Rule::is_exception));
    }

    #[test]
    fn unavailable_list_is_skipped() {
        let lists = vec![
            ListText { list_id: "down".to_string(), text: None },
            list("up", "||up.com^"),
        ];
        let compiled = RuleCompiler::default().compile(&lists, &BTreeSet::new());
        assert!(compiled.report.lists[0].skipped);
        assert_eq!(compiled.report.lists[1].rules, 1);
        assert!(compiled.rules.iter().any(|r| r.trigger.url_pattern.contains("up\\.com")));
    }

    #[test]
    fn compile_is_deterministic() {
        let lists = vec![list("a", "||x.com^\nsite.com##.ad\n||y.com^$script")];
        let excluded: BTreeSet<String> = ["b.org".to_string(), "a.org".to_string()].into_iter().collect();
        let compiler = RuleCompiler::default();

        let first = compiler.compile(&lists, &excluded).to_json().unwrap();
        let second = compiler.compile(&lists, &excluded).to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn whitelisted_domain_disappears_from_patterns() {
        let lists = vec![list("a", "||ads.example.com^\n||example.com/banner.js\n||other.net^")];
        let excluded: BTreeSet<String> = ["example.com".to_string()].into_iter().collect();
        let compiled = RuleCompiler::default().compile(&lists, &excluded);

        for rule in compiled.rules.iter().filter(|r| !r.is_exception()) {
            assert!(!rule.trigger.url_pattern.contains("example\\.com"));
            assert!(!rule.trigger.url_pattern.contains("example.com"));
        }
        assert!(compiled.rules.iter().any(|r| r.trigger.url_pattern.contains("other\\.net")));
        assert_eq!(compiled.report.whitelist_exceptions, 1);
        let last_whitelist = compiled
            .rules
            .iter()
            .find(|r| r.trigger.if_domains == Some(vec!["*example.com".to_string()]))
            .expect("whitelist exception");
        assert_eq!(last_whitelist.action, Action::IgnorePreviousRules);
    }

    #[test]
    fn whitelist_exceptions_can_be_disabled() {
        let compiler = RuleCompiler::new(CompileOptions {
            whitelist_exception_rules: false,
            ..CompileOptions::default()
        });
        let excluded: BTreeSet<String> = ["example.com".to_string()].into_iter().collect();
        let compiled = compiler.compile(&[], &excluded);
        assert_eq!(compiled.exception_count(), site_exception_count());
    }

    #[test]
    fn honors_per_list_ceiling() {
        let text: String = (0..50).map(|i| format!("||host{i}.com^\n")).collect();
        let compiler = RuleCompiler::new(CompileOptions {
            max_rules_per_list: 10,
            ..CompileOptions::default()
        });
        let compiled = compiler.compile(&[list("big", &text)], &BTreeSet::new());
        assert_eq!(compiled.report.lists[0].rules, 10);
        assert!(compiled.report.lists[0].truncated);
    }

    #[test]
    fn minimal_collection_ends_with_exceptions() {
        let rules = RuleCompiler::default().compile_minimal(&BTreeSet::new());
        assert!(!rules[0].is_exception());
        assert!(rules.last().unwrap().is_exception());
    }
}
