//! # Site Configuration
//!
//! `freshpress.toml` holds the site options, the snapshot location, the
//! oEmbed provider list and the users allowed to call the API.
//!
//! ```toml
//! [site]
//! name = "FreshPress"
//! home = "http://localhost:8080"
//! allow_anonymous_comments = true
//!
//! [storage]
//! snapshot = "freshpress.snap"
//!
//! [[oembed.providers]]
//! pattern = "https://www.youtube.com/watch*"
//! endpoint = "https://www.youtube.com/oembed"
//!
//! [[users]]
//! id = 1
//! login = "admin"
//! email = "admin@example.org"
//! role = "administrator"
//! api_key = "..."
//! ```

use freshpress_core::{FreshPressError, Role, SiteOptions, User};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Largest configuration file accepted.
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

/// Shortest API key accepted.
pub const MIN_API_KEY_LEN: usize = 16;

/// Longest oEmbed cache lifetime accepted (one year).
pub const MAX_OEMBED_CACHE_TTL: u64 = 365 * 24 * 60 * 60;

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file, relative to the configuration file.
    pub snapshot: PathBuf,
    /// Write the snapshot after every successful write request.
    pub persist_on_write: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot: PathBuf::from("freshpress.snap"),
            persist_on_write: true,
        }
    }
}

/// One oEmbed endpoint and the URLs it serves. `*` in the pattern matches
/// any run of characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub pattern: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OEmbedConfig {
    /// Seconds before an upstream fetch is abandoned.
    pub timeout_secs: u64,
    pub providers: Vec<ProviderConfig>,
}

impl Default for OEmbedConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            providers: Vec::new(),
        }
    }
}

/// A caller identity. The key is sent as `Authorization: Bearer <key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub url: String,
    pub role: Role,
    pub api_key: String,
}

impl UserConfig {
    /// Store record for this identity.
    #[must_use]
    pub fn to_user(&self) -> User {
        let display_name = if self.display_name.is_empty() {
            self.login.clone()
        } else {
            self.display_name.clone()
        };
        User {
            id: self.id,
            login: self.login.clone(),
            display_name,
            slug: freshpress_core::text::sanitize_title(&self.login),
            email: self.email.clone(),
            url: self.url.clone(),
            roles: vec![self.role],
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteOptions,
    pub storage: StorageConfig,
    pub oembed: OEmbedConfig,
    pub users: Vec<UserConfig>,
}

impl Config {
    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, FreshPressError> {
        let mut config: Self =
            toml::from_str(text).map_err(|e| FreshPressError::ConfigError(e.to_string()))?;
        config.site.home = config.site.home.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    /// Read `path`. The snapshot path is resolved against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, FreshPressError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            FreshPressError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(FreshPressError::ConfigError(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| FreshPressError::IoError(format!("Cannot read config: {}", e)))?;
        let mut config = Self::from_toml(&text)?;
        if config.storage.snapshot.is_relative() {
            let base = path.parent().unwrap_or(Path::new("."));
            config.storage.snapshot = base.join(&config.storage.snapshot);
        }
        tracing::info!(
            event = "config_loaded",
            path = %path.display(),
            users = config.users.len(),
            providers = config.oembed.providers.len(),
        );
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, FreshPressError> {
        toml::to_string_pretty(self).map_err(|e| FreshPressError::SerializationError(e.to_string()))
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), FreshPressError> {
        let home = url::Url::parse(&self.site.home).map_err(|e| {
            FreshPressError::ConfigError(format!("site.home '{}' is not a URL: {}", self.site.home, e))
        })?;
        if !matches!(home.scheme(), "http" | "https") {
            return Err(FreshPressError::ConfigError(
                "site.home must be an http(s) URL".to_string(),
            ));
        }
        if self.site.oembed_cache_ttl > MAX_OEMBED_CACHE_TTL {
            return Err(FreshPressError::ConfigError(format!(
                "site.oembed_cache_ttl {} exceeds {} seconds",
                self.site.oembed_cache_ttl, MAX_OEMBED_CACHE_TTL
            )));
        }

        let mut ids = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for user in &self.users {
            if user.id == 0 {
                return Err(FreshPressError::ConfigError(format!(
                    "User '{}' has id 0, which is reserved for anonymous callers",
                    user.login
                )));
            }
            if !ids.insert(user.id) {
                return Err(FreshPressError::ConfigError(format!(
                    "Duplicate user id {}",
                    user.id
                )));
            }
            if user.api_key.len() < MIN_API_KEY_LEN {
                return Err(FreshPressError::ConfigError(format!(
                    "API key of user '{}' is shorter than {} characters",
                    user.login, MIN_API_KEY_LEN
                )));
            }
            if !keys.insert(user.api_key.as_str()) {
                return Err(FreshPressError::ConfigError(format!(
                    "User '{}' reuses another user's API key",
                    user.login
                )));
            }
        }

        for provider in &self.oembed.providers {
            url::Url::parse(&provider.endpoint).map_err(|e| {
                FreshPressError::ConfigError(format!(
                    "oEmbed endpoint '{}' is not a URL: {}",
                    provider.endpoint, e
                ))
            })?;
        }
        Ok(())
    }

    /// Starter configuration written by `init`.
    #[must_use]
    pub fn starter(api_key: String) -> Self {
        Self {
            users: vec![UserConfig {
                id: 1,
                login: "admin".to_string(),
                display_name: "Administrator".to_string(),
                email: "admin@example.org".to_string(),
                url: String::new(),
                role: Role::Administrator,
                api_key,
            }],
            oembed: OEmbedConfig {
                providers: vec![
                    ProviderConfig {
                        pattern: "https://www.youtube.com/watch*".to_string(),
                        endpoint: "https://www.youtube.com/oembed".to_string(),
                    },
                    ProviderConfig {
                        pattern: "https://vimeo.com/*".to_string(),
                        endpoint: "https://vimeo.com/api/oembed.json".to_string(),
                    },
                ],
                ..OEmbedConfig::default()
            },
            ..Self::default()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123";

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.site, SiteOptions::default());
        assert!(config.users.is_empty());
        assert_eq!(config.storage.snapshot, PathBuf::from("freshpress.snap"));
    }

    #[test]
    fn parses_site_and_users() {
        let text = format!(
            r#"
            [site]
            name = "Blog"
            home = "https://blog.example/"
            allow_anonymous_comments = true
            gmt_offset_minutes = 120

            [[users]]
            id = 3
            login = "Writer One"
            role = "author"
            api_key = "{KEY}"
            "#
        );
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.site.name, "Blog");
        assert_eq!(config.site.home, "https://blog.example");
        assert!(config.site.allow_anonymous_comments);
        assert!(config.site.require_name_email);
        let user = config.users[0].to_user();
        assert_eq!(user.roles, vec![Role::Author]);
        assert_eq!(user.display_name, "Writer One");
        assert_eq!(user.slug, "writer-one");
    }

    #[test]
    fn rejects_bad_values() {
        let short = r#"
            [[users]]
            id = 1
            login = "a"
            role = "editor"
            api_key = "short"
        "#;
        assert!(matches!(Config::from_toml(short), Err(FreshPressError::ConfigError(_))));

        let home = "[site]\nhome = \"not a url\"\n";
        assert!(Config::from_toml(home).is_err());

        let duplicate = format!(
            "[[users]]\nid = 1\nlogin = \"a\"\nrole = \"editor\"\napi_key = \"{KEY}\"\n\
             [[users]]\nid = 2\nlogin = \"b\"\nrole = \"author\"\napi_key = \"{KEY}\"\n"
        );
        assert!(Config::from_toml(&duplicate).is_err());
    }

    #[test]
    fn rejects_oversized_cache_ttl() {
        let text = format!("[site]\noembed_cache_ttl = {}\n", MAX_OEMBED_CACHE_TTL + 1);
        assert!(matches!(Config::from_toml(&text), Err(FreshPressError::ConfigError(_))));
        let text = format!("[site]\noembed_cache_ttl = {}\n", MAX_OEMBED_CACHE_TTL);
        assert_eq!(Config::from_toml(&text).unwrap().site.oembed_cache_ttl, MAX_OEMBED_CACHE_TTL);
    }

    #[test]
    fn starter_round_trips_through_toml() {
        let config = Config::starter(KEY.to_string());
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn load_resolves_snapshot_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freshpress.toml");
        std::fs::write(&path, "[storage]\nsnapshot = \"data.snap\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.snapshot, dir.path().join("data.snap"));
    }
}
