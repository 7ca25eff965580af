//! OAuth provider configurations.
//!
//! Defines OAuth 2.0 configuration for each supported content platform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Providers this service knows how to talk to.
pub const SUPPORTED_PROVIDERS: &[&str] = &["google", "adobe"];

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token endpoint URL (code exchange and refresh)
    pub token_url: String,

    pub scopes: Vec<String>,

    /// Extra query parameters for the authorization URL
    #[serde(default)]
    pub extra_auth_params: Vec<(String, String)>,

    pub client_id: String,

    pub client_secret: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl ProviderConfig {
    /// Known endpoints for a supported provider, with the given client credentials.
    pub fn well_known(name: &str, client_id: &str, client_secret: &str) -> Option<Self> {
        let (auth_url, token_url, scopes, extra): (&str, &str, Vec<&str>, Vec<(&str, &str)>) =
            match name {
                "google" => (
                    "https://accounts.google.com/o/oauth2/v2/auth",
                    "https://oauth2.googleapis.com/token",
                    vec!["openid", "email", "profile"],
                    // Google only issues refresh tokens for offline access with consent
                    vec![("access_type", "offline"), ("prompt", "consent")],
                ),
                "adobe" => (
                    "https://ims-na1.adobelogin.com/ims/authorize/v2",
                    "https://ims-na1.adobelogin.com/ims/token/v3",
                    vec!["openid", "email", "profile", "offline_access", "additional_info.roles"],
                    vec![],
                ),
                _ => return None,
            };

        Some(Self {
            name: name.to_string(),
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            scopes: scopes.into_iter().map(str::to_string).collect(),
            extra_auth_params: extra
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Build authorization URL with state and redirect_uri
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str) -> String {
        let scopes = self.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        );

        for (key, value) in &self.extra_auth_params {
            url.push('&');
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        url
    }
}

/// The set of providers that have client credentials configured.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|config| (config.name.clone(), config))
                .collect(),
        }
    }

    /// Builds the registry from `(provider, client_id, client_secret)` triples.
    ///
    /// Unknown provider names are ignored.
    pub fn from_clients<'a>(clients: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        Self::new(
            clients
                .into_iter()
                .filter_map(|(name, id, secret)| ProviderConfig::well_known(name, id, secret)),
        )
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn configured(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

/// Check if a provider name is one we support (configured or not)
pub fn is_supported_provider(name: &str) -> bool {
    SUPPORTED_PROVIDERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_provider_names() {
        assert!(is_supported_provider("google"));
        assert!(is_supported_provider("adobe"));
        assert!(!is_supported_provider("github"));
        assert!(!is_supported_provider(""));
    }

    #[test]
    fn test_build_auth_url() {
        let config = ProviderConfig {
            name: "example".to_string(),
            auth_url: "https://example.com/oauth/authorize".to_string(),
            token_url: "https://example.com/oauth/token".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
            extra_auth_params: vec![("access_type".to_string(), "offline".to_string())],
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
        };

        let url = config.build_auth_url("random_state", "http://localhost:8080/callback");

        assert!(url.starts_with("https://example.com/oauth/authorize?"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcallback"));
        // URL encoding converts spaces to %20
        assert!(url.contains("scope=read%20write"));
        assert!(url.contains("state=random_state"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains("test_secret"));
    }

    #[test]
    fn test_registry_only_keeps_known_providers() {
        let registry = ProviderRegistry::from_clients([
            ("google", "gid", "gsecret"),
            ("github", "hid", "hsecret"),
        ]);

        assert_eq!(registry.configured(), vec!["google"]);
        let google = registry.get("google").unwrap();
        assert_eq!(google.client_id, "gid");
        assert_eq!(google.token_url, "https://oauth2.googleapis.com/token");
        assert!(registry.get("adobe").is_none());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ProviderConfig::well_known("adobe", "id", "very-secret").unwrap();
        assert!(!format!("{:?}", config).contains("very-secret"));
    }
}
