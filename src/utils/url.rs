//! Joining the configured service URL with endpoint paths.

/// Normalize a base URL by removing trailing slashes
///
/// Configured service URLs are often pasted with a trailing slash.
///
/// # Examples
///
/// ```
/// use causette::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/api"), "http://localhost:8000/api");
/// assert_eq!(normalize_base_url("http://localhost:8000/api//"), "http://localhost:8000/api");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Construct a complete API endpoint URL from a base URL and endpoint path
///
/// Leading slashes on the endpoint are dropped; trailing ones are kept.
///
/// # Examples
///
/// ```
/// use causette::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000/api", "sessions/"),
///     "http://localhost:8000/api/sessions/"
/// );
/// assert_eq!(
///     construct_api_url("http://localhost:8000/api/", "/sessions/42/stop"),
///     "http://localhost:8000/api/sessions/42/stop"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}
