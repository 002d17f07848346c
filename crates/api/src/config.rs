//! Remote service settings, read from the environment.

#![forbid(unsafe_code)]

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL; collection paths are appended to it.
    pub base_url: String,
    /// Bearer token, if the session has one.
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_API_URL.to_string(), token: None }
    }
}

impl ApiConfig {
    /// `VITRINE_API_URL`, `VITRINE_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = get("VITRINE_API_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = get("VITRINE_TOKEN").filter(|s| !s.trim().is_empty());
        Self { base_url, token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset_or_blank() {
        assert_eq!(ApiConfig::from_lookup(|_| None), ApiConfig::default());
        let c = ApiConfig::from_lookup(|_| Some("  ".into()));
        assert_eq!(c.base_url, DEFAULT_API_URL);
        assert!(c.token.is_none());
    }

    #[test]
    fn trims_trailing_slash() {
        let c = ApiConfig::from_lookup(|k| match k {
            "VITRINE_API_URL" => Some("https://api.example.test/v1/".into()),
            "VITRINE_TOKEN" => Some("tok".into()),
            _ => None,
        });
        assert_eq!(c.base_url, "https://api.example.test/v1");
        assert_eq!(c.token.as_deref(), Some("tok"));
    }
}
