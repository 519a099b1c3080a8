//! URL and domain helpers
//!
//! Lookups work on slices of the input URL; only the normalizers allocate.

// =============================================================================
// Host Extraction
// =============================================================================

/// Authority part of a URL: everything between `://` and the first `/`,
/// `?` or `#`.
fn authority(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let end = rest.find(&['/', '?', '#'][..]).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Host of a URL as a slice of the input, without userinfo or port.
/// Bracketed IPv6 hosts keep their brackets.
pub fn extract_host(url: &str) -> Option<&str> {
    let authority = authority(url)?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, after)| after);

    let host = if host_port.starts_with('[') {
        let close = host_port.find(']')?;
        &host_port[..=close]
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    (!host.is_empty()).then_some(host)
}

// =============================================================================
// Domain Normalization
// =============================================================================

/// Normalize a bare host: lowercase, trailing dot and leading `www.` removed.
/// Returns `None` when the host contains characters outside `[a-z0-9.-]`.
pub fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    let stripped = lower.strip_prefix("www.").unwrap_or(&lower);
    if stripped.is_empty() || stripped.starts_with('.') || stripped.contains("..") {
        return None;
    }
    Some(stripped.to_string())
}

/// Normalized domain of a URL's host.
pub fn domain_of_url(url: &str) -> Option<String> {
    extract_host(url).and_then(normalize_domain)
}

/// Whether `host` equals `domain` or is one of its subdomains.
/// Both sides are compared case-insensitively; a leading `www.` on `host`
/// is ignored.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    let host = match host.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("www.") => &host[4..],
        _ => host,
    };

    if host.len() < domain.len() {
        return false;
    }
    let split = host.len() - domain.len();
    if !host.is_char_boundary(split) || !host[split..].eq_ignore_ascii_case(domain) {
        return false;
    }
    split == 0 || host.as_bytes()[split - 1] == b'.'
}

/// Match a page host against one `if-domain`/`unless-domain` entry.
/// A leading `*` extends the entry to subdomains.
pub fn host_matches_domain_entry(host: &str, entry: &str) -> bool {
    match entry.strip_prefix('*') {
        Some(domain) => host_matches_domain(host, domain),
        None => host.trim_end_matches('.').eq_ignore_ascii_case(entry),
    }
}
