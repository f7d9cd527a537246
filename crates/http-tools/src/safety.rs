//! Redaction helpers for outbound HTTP.
//!
//! Query strings may carry API keys (query-located `api_key` auth), so URLs are stripped before
//! they reach logs or error messages.

use url::Url;

const MASK: &str = "***";

/// Drop userinfo and fragment, and mask every query value. Query keys stay visible so logs still
/// show which parameters were sent.
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_fragment(None);

    let keys: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    if keys.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut()
            .clear()
            .extend_pairs(keys.iter().map(|k| (k.as_str(), MASK)));
    }
    u.to_string()
}

/// `reqwest` error text with the request URL redacted.
#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let text = e.to_string();
    match e.url() {
        Some(u) => text.replace(u.as_str(), &redact_url(u)),
        None => text,
    }
}
