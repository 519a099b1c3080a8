//! Built-in rule tables
//!
//! Blocking rules are written in filter syntax and go through the same
//! parser as downloaded lists, so whitelisted domains drop out of them too.

use std::collections::BTreeSet;

use tg_core::types::{Rule, Trigger};

use crate::parser::{parse_line, MATCH_ALL};

/// Hand-authored blocking rules for common ad and tracker hosts. Hosts end
/// in `/` rather than `^`, which the parser keeps as a literal character.
pub const BUILTIN_FILTERS: &[&str] = &[
    "||doubleclick.net/",
    "||googlesyndication.com/",
    "||googleadservices.com/",
    "||google-analytics.com/",
    "||googletagservices.com/",
    "||adservice.google.com/",
    "||amazon-adsystem.com/",
    "||adnxs.com/",
    "||criteo.com/",
    "||criteo.net/",
    "||taboola.com/",
    "||outbrain.com/",
    "||scorecardresearch.com/",
    "||quantserve.com/",
    "||moatads.com/",
    "||pubmatic.com/",
    "||rubiconproject.com/",
    "||openx.net/",
    "||adsrvr.org/",
    "||casalemedia.com/",
    "||facebook.net/*/fbevents.js",
    "||hotjar.com/$script",
    "||ads-twitter.com/",
    "||media.net/$script",
    // Global cosmetic rule for common ad containers.
    "##.adsbygoogle, [id^=\"google_ads_\"], [id^=\"div-gpt-ad\"], [class*=\"ad-banner\"], [data-ad-slot], ins.adsbygoogle",
];

/// Small subset compiled when every regular shard fails.
pub const MINIMAL_FILTERS: &[&str] = &[
    "||doubleclick.net/",
    "||googlesyndication.com/",
    "||googleadservices.com/",
    "||amazon-adsystem.com/",
    "||adnxs.com/",
];

/// Pages where generic blocking is known to break sign-in or checkout.
pub const EXCEPTION_PAGE_DOMAINS: &[&str] = &[
    "accounts.google.com",
    "login.microsoftonline.com",
    "appleid.apple.com",
    "paypal.com",
    "github.com",
];

/// Request URLs that must never be blocked (challenge and payment widgets).
pub const EXCEPTION_URL_PATTERNS: &[&str] = &[
    "^https?://([^/]+\\.)?google\\.com/recaptcha/",
    "^https?://([^/]+\\.)?gstatic\\.com/recaptcha/",
    "^https?://([^/]+\\.)?hcaptcha\\.com/",
    "^https?://js\\.stripe\\.com/",
    "^https?://challenges\\.cloudflare\\.com/",
];

fn parse_table(table: &[&str], excluded: &BTreeSet<String>) -> Vec<Rule> {
    table.iter().filter_map(|line| parse_line(line, excluded)).collect()
}

/// Built-in blocking rules (network rules plus one global cosmetic rule).
pub fn builtin_rules(excluded: &BTreeSet<String>) -> Vec<Rule> {
    parse_table(BUILTIN_FILTERS, excluded)
}

/// Fallback blocking rules for the minimal artifact.
pub fn minimal_rules(excluded: &BTreeSet<String>) -> Vec<Rule> {
    parse_table(MINIMAL_FILTERS, excluded)
}

/// Site-specific exception rules. Always present, always appended last.
pub fn exception_rules() -> Vec<Rule> {
    let by_page = EXCEPTION_PAGE_DOMAINS.iter().map(|domain| {
        Rule::exception(Trigger {
            if_domains: Some(vec![format!("*{domain}")]),
            ..Trigger::url(MATCH_ALL)
        })
    });
    let by_url = EXCEPTION_URL_PATTERNS
        .iter()
        .map(|pattern| Rule::exception(Trigger::url(*pattern)));

    by_page.chain(by_url).collect()
}

/// Exception rule that lets every request through on a whitelisted site.
pub fn whitelist_exception(domain: &str) -> Rule {
    Rule::exception(Trigger {
        if_domains: Some(vec![format!("*{domain}")]),
        ..Trigger::url(MATCH_ALL)
    })
}
