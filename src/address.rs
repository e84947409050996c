use url::Url;

const TAB_TITLE_MAX: usize = 20;

pub const FALLBACK_TAB_TITLE: &str = "New Tab";

/// Normalizes raw address-bar input into a candidate URL.
///
/// Input is trimmed; empty input yields `None`. Anything without an explicit
/// `http://`/`https://` prefix is treated as a hostname and gets `https://`
/// prepended.
pub fn normalize_address_input(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("https://{}", trimmed))
    }
}

/// Local schemes that never leave the machine and bypass all gating.
pub fn is_local_scheme(url: &str) -> bool {
    url.starts_with("file://") || url.starts_with("data:") || url.starts_with("blob:")
}

/// True when the string parses as a web URL the gate can evaluate.
pub fn is_valid_web_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// Hostname of `url` with a leading `www.` stripped, for search queries.
pub fn search_host_for(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let stripped = host.strip_prefix("www.").unwrap_or(host);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Display title for a tab, derived from the URL's hostname.
pub fn tab_title_for(url: &str) -> String {
    let title = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
        Some(host) => host,
        None => return FALLBACK_TAB_TITLE.to_string(),
    };
    if title.chars().count() > TAB_TITLE_MAX {
        let truncated: String = title.chars().take(TAB_TITLE_MAX).collect();
        format!("{}...", truncated)
    } else {
        title
    }
}
