pub mod feature_toggles;
pub mod rate_limits;
pub mod settings;

pub use feature_toggles::FeatureToggles;
pub use rate_limits::{RateLimitSettings, SourceQuota};
pub use settings::{
    ApiClientSettings, CacheSettings, ControllerSettings, EndpointSettings, RetrievalSettings,
    ServerSettings, VectorIndexSettings,
};

use std::str::FromStr;

/// Names of the downstream sources the pipeline talks to
pub mod sources {
    pub const EMBEDDING: &str = "embedding";
    pub const SEMANTIC_SEARCH: &str = "semantic-search";
    pub const KEYWORD_SEARCH: &str = "keyword-search";
    pub const HYBRID_SEARCH: &str = "hybrid-search";
    pub const GENERATION: &str = "generation";
}

/// Full service configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub rate_limits: RateLimitSettings,
    pub cache: CacheSettings,
    pub api: ApiClientSettings,
    pub vector_index: VectorIndexSettings,
    pub retrieval: RetrievalSettings,
    pub controller: ControllerSettings,
    pub feature_toggles: FeatureToggles,
}

impl AppConfig {
    pub fn from_env() -> Self {
        // Load feature toggles from default path or env var
        let toggles = FeatureToggles::from_env_path();

        Self {
            server: ServerSettings::from_env(),
            rate_limits: RateLimitSettings::from_env(),
            cache: CacheSettings::from_env(),
            api: ApiClientSettings::from_env(),
            vector_index: VectorIndexSettings::from_env(),
            retrieval: RetrievalSettings::from_env(),
            controller: ControllerSettings::from_env(),
            feature_toggles: toggles,
        }
    }
}

/// Read an environment variable and parse it, falling back to `default` when unset or invalid
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("⚠️  Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read an optional string environment variable, treating empty values as unset
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_missing() {
        let value: u64 = env_or("POSTGEN_TEST_DOES_NOT_EXIST", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_falls_back_on_invalid() {
        std::env::set_var("POSTGEN_TEST_INVALID_NUMBER", "not-a-number");
        let value: u32 = env_or("POSTGEN_TEST_INVALID_NUMBER", 7);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_opt_ignores_blank() {
        std::env::set_var("POSTGEN_TEST_BLANK", "   ");
        assert_eq!(env_opt("POSTGEN_TEST_BLANK"), None);
    }
}
