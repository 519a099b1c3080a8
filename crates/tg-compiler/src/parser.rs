use std::collections::BTreeSet;

use log::debug;
use tg_core::types::{ResourceType, Rule, Trigger};

/// Default ceiling on rules produced from a single filter list.
pub const DEFAULT_MAX_RULES_PER_LIST: usize = 10_000;

/// Url-filter used by cosmetic rules: they apply to every page.
pub const MATCH_ALL: &str = ".*";

/// Result of parsing one filter list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedList {
    pub rules: Vec<Rule>,
    /// Lines visited (including the ones that produced nothing)
    pub lines: usize,
    /// Non-comment lines that could not be translated
    pub rejected: usize,
    /// Parsing stopped at the rule ceiling
    pub truncated: bool,
}

/// Parse a whole filter list, stopping once `max_rules` rules were produced.
pub fn parse_filter_list(text: &str, excluded: &BTreeSet<String>, max_rules: usize) -> ParsedList {
    let mut parsed = ParsedList::default();

    for raw_line in text.lines() {
        if parsed.rules.len() >= max_rules {
            parsed.truncated = true;
            break;
        }
        parsed.lines += 1;

        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        match parse_line(line, excluded) {
            Some(rule) => parsed.rules.push(rule),
            None => parsed.rejected += 1,
        }
    }

    debug!(
        "parsed {} rules from {} lines ({} rejected{})",
        parsed.rules.len(),
        parsed.lines,
        parsed.rejected,
        if parsed.truncated { ", truncated" } else { "" }
    );

    parsed
}

/// Translate one filter-list line into at most one rule.
///
/// `excluded` holds normalized domains; network rules whose pattern text
/// mentions one of them are dropped.
pub fn parse_line(raw_line: &str, excluded: &BTreeSet<String>) -> Option<Rule> {
    let line = raw_line.trim();
    if line.is_empty() || is_comment_line(line) {
        return None;
    }

    if !line.is_ascii() {
        return None;
    }

    // Cosmetic exceptions are not translated, same as network exceptions.
    if line.contains("#@#") {
        return None;
    }

    if let Some(pos) = line.find("##") {
        return parse_cosmetic_rule(&line[..pos], &line[pos + 2..]);
    }

    if line.contains("@@") {
        return None;
    }

    parse_network_rule(line, excluded)
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[')
}

// =============================================================================
// Cosmetic Rules
// =============================================================================

fn parse_cosmetic_rule(domains: &str, selector: &str) -> Option<Rule> {
    let selector = selector.trim();
    if selector.is_empty() {
        return None;
    }

    let mut if_domains = Vec::new();
    let mut unless_domains = Vec::new();

    let domains = domains.trim();
    if !domains.is_empty() && domains != "*" {
        for raw in domains.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match raw.strip_prefix('~') {
                Some(domain) => unless_domains.push(domain.to_ascii_lowercase()),
                None => if_domains.push(raw.to_ascii_lowercase()),
            }
        }
    }

    let trigger = Trigger {
        url_pattern: MATCH_ALL.to_string(),
        resource_types: ResourceType::empty(),
        if_domains: non_empty(if_domains),
        unless_domains: non_empty(unless_domains),
    };

    Some(Rule::css_hide(trigger, selector))
}

fn non_empty(domains: Vec<String>) -> Option<Vec<String>> {
    if domains.is_empty() {
        None
    } else {
        Some(domains)
    }
}

// =============================================================================
// Network Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorType {
    #[default]
    None,
    Left,
    Hostname,
}

fn parse_network_rule(line: &str, excluded: &BTreeSet<String>) -> Option<Rule> {
    let (pattern_part, options_text) = split_rule_options(line);
    let resource_types = options_text.map(parse_options).unwrap_or_else(ResourceType::empty);

    let pattern = pattern_part.trim();
    let (anchor_type, rest) = if let Some(rest) = pattern.strip_prefix("||") {
        (AnchorType::Hostname, rest)
    } else if let Some(rest) = pattern.strip_prefix('|') {
        (AnchorType::Left, rest)
    } else {
        (AnchorType::None, pattern)
    };

    let (literal, right_anchor) = match rest.strip_suffix('|') {
        Some(literal) => (literal, true),
        None => (rest, false),
    };

    if literal.is_empty() || literal.chars().all(|c| c == '*') {
        return None;
    }

    if mentions_excluded_domain(literal, excluded) {
        debug!("dropping '{}': mentions a whitelisted domain", line);
        return None;
    }

    let mut trigger = Trigger::url(translate_pattern(literal, anchor_type, right_anchor));
    trigger.resource_types = resource_types;
    Some(Rule::block(trigger))
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.rfind('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

/// Recognized type modifiers narrow the rule; everything else is ignored.
fn parse_options(text: &str) -> ResourceType {
    let mut types = ResourceType::empty();
    for raw in text.split(',') {
        let name = raw.trim().to_ascii_lowercase();
        if let Some(ty) = ResourceType::from_modifier(&name) {
            types |= ty;
        }
    }
    types
}

fn mentions_excluded_domain(literal: &str, excluded: &BTreeSet<String>) -> bool {
    if excluded.is_empty() {
        return false;
    }
    let lower = literal.to_ascii_lowercase();
    excluded.iter().any(|domain| lower.contains(domain.as_str()))
}

/// Build the url-filter expression. Literal text is escaped segment by
/// segment; `*` wildcards become `.*`.
pub fn translate_pattern(literal: &str, anchor_type: AnchorType, right_anchor: bool) -> String {
    let mut body = String::with_capacity(literal.len() * 2);
    for (i, segment) in literal.split('*').enumerate() {
        if i > 0 {
            body.push_str(".*");
        }
        body.push_str(&escape_literal(segment));
    }

    let prefix = match anchor_type {
        AnchorType::Left => "^",
        AnchorType::Hostname | AnchorType::None => ".*",
    };
    let suffix = if right_anchor { "$" } else { ".*" };

    let mut pattern = String::with_capacity(prefix.len() + body.len() + suffix.len());
    pattern.push_str(prefix);
    pattern.push_str(&body);
    pattern.push_str(suffix);
    pattern
}

fn escape_literal(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if matches!(
            ch,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
