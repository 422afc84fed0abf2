//! Endpoint URL construction for user-supplied base URLs.
//!
//! Base URLs come from config or `OPENAI_BASE_URL` and may or may not carry a
//! scheme, trailing slashes, or a `/v1` suffix. Everything is normalized here so
//! adapters can join paths without caring.

/// Remove trailing slashes from a base URL.
///
/// # Examples
///
/// ```
/// use murmur::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://api.example.com/"), "https://api.example.com");
/// assert_eq!(normalize_base_url("https://api.example.com///"), "https://api.example.com");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Prefix `https://` when the base URL has no scheme.
///
/// ```
/// use murmur::utils::url::ensure_scheme;
///
/// assert_eq!(ensure_scheme("api.example.com"), "https://api.example.com");
/// assert_eq!(ensure_scheme("http://localhost:8080"), "http://localhost:8080");
/// ```
pub fn ensure_scheme(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// Join a base URL and an endpoint path with exactly one slash between them.
///
/// ```
/// use murmur::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Build a `/v1/<endpoint>` URL, accepting bases that already end in `/v1`.
///
/// ```
/// use murmur::utils::url::construct_versioned_api_url;
///
/// assert_eq!(
///     construct_versioned_api_url("api.openai.com", "chat/completions"),
///     "https://api.openai.com/v1/chat/completions"
/// );
/// assert_eq!(
///     construct_versioned_api_url("https://proxy.example.com/v1/", "images/generations"),
///     "https://proxy.example.com/v1/images/generations"
/// );
/// ```
pub fn construct_versioned_api_url(base_url: &str, endpoint: &str) -> String {
    let base = normalize_base_url(&ensure_scheme(base_url));
    let base = base.strip_suffix("/v1").unwrap_or(&base);
    construct_api_url(&format!("{base}/v1"), endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_slashes() {
        assert_eq!(
            normalize_base_url("  https://api.example.com/v1/ "),
            "https://api.example.com/v1"
        );
        assert_eq!(normalize_base_url(""), "");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn scheme_is_only_added_when_missing() {
        assert_eq!(ensure_scheme("localhost:1234"), "https://localhost:1234");
        assert_eq!(ensure_scheme(" https://a.test "), "https://a.test");
        assert_eq!(ensure_scheme("http://a.test"), "http://a.test");
    }

    #[test]
    fn construct_api_url_avoids_double_slashes() {
        assert_eq!(
            construct_api_url("https://api.example.com/v1///", "///models"),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            construct_api_url("https://api.example.com", "v1/chat/completions"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn versioned_urls_do_not_repeat_the_version() {
        assert_eq!(
            construct_versioned_api_url("https://api.openai.com", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            construct_versioned_api_url("https://api.openai.com/v1", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            construct_versioned_api_url("http://localhost:11434/", "/images/generations"),
            "http://localhost:11434/v1/images/generations"
        );
    }
}
