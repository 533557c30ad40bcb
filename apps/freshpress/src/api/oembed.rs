//! # oEmbed HTTP Provider
//!
//! Resolves URLs for the proxy endpoint against the configured provider
//! list, falling back to `<link rel="alternate">` discovery on the page
//! itself when `discover` is set.
//!
//! Fetches are blocking; the proxy runs on the blocking pool.

use crate::config::OEmbedConfig;
use freshpress_core::{FreshPressError, OEmbedProvider};
use regex::Regex;
use serde_json::{Map, Value};
use std::time::Duration;

/// Largest upstream body read.
const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct ProviderRule {
    pattern: Regex,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub struct HttpOEmbedProvider {
    rules: Vec<ProviderRule>,
    timeout: Duration,
    discovery_link: Regex,
    href: Regex,
}

impl HttpOEmbedProvider {
    pub fn from_config(config: &OEmbedConfig) -> Result<Self, FreshPressError> {
        let rules = config
            .providers
            .iter()
            .map(|p| {
                Ok(ProviderRule {
                    pattern: wildcard_regex(&p.pattern)?,
                    endpoint: p.endpoint.clone(),
                })
            })
            .collect::<Result<Vec<_>, FreshPressError>>()?;
        let discovery_link =
            Regex::new(r#"(?i)<link[^>]+type=["']application/json\+oembed["'][^>]*>"#)
                .map_err(|e| FreshPressError::ConfigError(e.to_string()))?;
        let href = Regex::new(r#"(?i)href=["']([^"']+)["']"#)
            .map_err(|e| FreshPressError::ConfigError(e.to_string()))?;
        Ok(Self {
            rules,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            discovery_link,
            href,
        })
    }

    /// Endpoint of the first provider whose pattern matches `url`.
    pub fn endpoint_for(&self, url: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(url))
            .map(|r| r.endpoint.as_str())
    }

    /// `endpoint?url=...&format=json&maxwidth=...&maxheight=...`
    pub fn request_url(endpoint: &str, url: &str, args: &Map<String, Value>) -> Option<String> {
        let mut request = url::Url::parse(endpoint).ok()?;
        {
            let mut query = request.query_pairs_mut();
            query.append_pair("url", url);
            query.append_pair("format", "json");
            for key in ["maxwidth", "maxheight"] {
                if let Some(value) = args.get(key).and_then(scalar) {
                    query.append_pair(key, &value);
                }
            }
        }
        Some(request.into())
    }

    /// oEmbed endpoint advertised by the page's discovery link.
    pub fn discovered_endpoint(&self, html: &str) -> Option<String> {
        let tag = self.discovery_link.find(html)?;
        let caps = self.href.captures(tag.as_str())?;
        Some(caps.get(1)?.as_str().replace("&amp;", "&"))
    }

    fn get(client: &reqwest::blocking::Client, url: &str) -> Option<String> {
        let response = client
            .get(url)
            .send()
            .map_err(|e| tracing::warn!(event = "oembed_fetch_failed", url, error = %e))
            .ok()?;
        if !response.status().is_success() {
            tracing::warn!(event = "oembed_fetch_failed", url, status = response.status().as_u16());
            return None;
        }
        let text = response.text().ok()?;
        (text.len() <= MAX_RESPONSE_SIZE).then_some(text)
    }
}

impl OEmbedProvider for HttpOEmbedProvider {
    fn fetch(&self, url: &str, args: &Map<String, Value>) -> Option<Value> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("FreshPress/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| tracing::warn!(event = "oembed_client_failed", error = %e))
            .ok()?;

        let discover = args
            .get("discover")
            .is_none_or(freshpress_core::text::value_as_bool);
        let request_url = match self.endpoint_for(url) {
            Some(endpoint) => Self::request_url(endpoint, url, args)?,
            None if discover => {
                let html = Self::get(&client, url)?;
                let endpoint = self.discovered_endpoint(&html)?;
                tracing::debug!(event = "oembed_discovered", url, endpoint = %endpoint);
                endpoint
            }
            None => return None,
        };

        let body = Self::get(&client, &request_url)?;
        let data: Value = serde_json::from_str(&body).ok()?;
        data.is_object().then_some(data)
    }
}

/// `*` matches any run of characters; everything else is literal.
fn wildcard_regex(pattern: &str) -> Result<Regex, FreshPressError> {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("(?i)^{}$", escaped.join(".*")))
        .map_err(|e| FreshPressError::ConfigError(format!("Invalid provider pattern '{}': {}", pattern, e)))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use serde_json::json;

    fn provider() -> HttpOEmbedProvider {
        HttpOEmbedProvider::from_config(&OEmbedConfig {
            providers: vec![ProviderConfig {
                pattern: "https://video.example/watch*".into(),
                endpoint: "https://video.example/oembed".into(),
            }],
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn wildcard_patterns_match_literally_elsewhere() {
        let p = provider();
        assert_eq!(
            p.endpoint_for("https://video.example/watch?v=1"),
            Some("https://video.example/oembed")
        );
        assert_eq!(p.endpoint_for("https://videoXexample/watch?v=1"), None);
        assert_eq!(p.endpoint_for("https://other.example/watch"), None);
    }

    #[test]
    fn request_url_carries_dimensions() {
        let mut args = Map::new();
        args.insert("maxwidth".into(), json!(400));
        args.insert("maxheight".into(), json!("300"));
        let url = HttpOEmbedProvider::request_url(
            "https://video.example/oembed",
            "https://video.example/watch?v=1",
            &args,
        )
        .unwrap();
        assert_eq!(
            url,
            "https://video.example/oembed?url=https%3A%2F%2Fvideo.example%2Fwatch%3Fv%3D1&format=json&maxwidth=400&maxheight=300"
        );
    }

    #[test]
    fn discovery_reads_json_link() {
        let html = r#"<head><link rel="alternate" type="application/json+oembed"
            href="https://blog.example/oembed?url=x&amp;format=json" /></head>"#;
        assert_eq!(
            provider().discovered_endpoint(html).as_deref(),
            Some("https://blog.example/oembed?url=x&format=json")
        );
        assert_eq!(provider().discovered_endpoint("<html></html>"), None);
    }

    #[test]
    fn no_match_without_discovery_is_none() {
        let mut args = Map::new();
        args.insert("discover".into(), json!(false));
        assert_eq!(provider().fetch("https://nowhere.example/", &args), None);
    }
}
