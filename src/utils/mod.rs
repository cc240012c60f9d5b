//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Build a URL from a base and query parameters, keeping any existing query.
pub fn with_params(base: &str, params: &[(&str, &str)]) -> crate::error::Result<String> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.to_string())
}

/// Join path segments onto a base URL, ignoring a trailing slash on the base.
pub fn join_path(base: &str, segments: &[&str]) -> crate::error::Result<String> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| crate::error::AppError::config(format!("URL cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_params_encodes_values() {
        let url = with_params(
            "https://api.example.com/1.0/ubuntu/natty",
            &[("ws.op", "getBuildRecords"), ("build_state", "Failed to build")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://api.example.com/1.0/ubuntu/natty?ws.op=getBuildRecords&build_state=Failed+to+build"
        );
    }

    #[test]
    fn test_join_path() {
        assert_eq!(
            join_path("https://api.example.com/1.0/", &["ubuntu", "natty"]).unwrap(),
            "https://api.example.com/1.0/ubuntu/natty"
        );
        assert_eq!(
            join_path("https://api.example.com/1.0", &["ubuntu"]).unwrap(),
            "https://api.example.com/1.0/ubuntu"
        );
    }
}
