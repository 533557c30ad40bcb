//! # Response Envelope
//!
//! Outgoing result: data, status, headers and relation links. Links are
//! rendered into `_links` when the response is serialized, with
//! `https://api.w.org/` relations compacted into the `wp:` CURIE.

use crate::types::RestError;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Relation namespace compacted into the `wp` CURIE.
pub const API_REL_BASE: &str = "https://api.w.org/";

/// One relation target.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub href: String,
    pub attributes: Map<String, Value>,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn attr(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    fn to_json(&self) -> Value {
        let mut out = Map::new();
        for (k, v) in &self.attributes {
            out.insert(k.clone(), v.clone());
        }
        out.insert("href".into(), json!(self.href));
        Value::Object(out)
    }
}

/// Relation name => targets.
pub type Links = BTreeMap<String, Vec<Link>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    data: Value,
    status: u16,
    headers: Vec<(String, String)>,
    links: Links,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl Response {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            status: 200,
            headers: Vec::new(),
            links: Links::new(),
        }
    }

    /// Error body with the error's status.
    #[must_use]
    pub fn from_error(err: &RestError) -> Self {
        let mut response = Self::new(err.to_json());
        response.status = err.status;
        response
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = data;
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    // -------------------------------------------------------------------------
    // Headers
    // -------------------------------------------------------------------------

    /// Set a header. With `replace` off the value is appended as another line.
    pub fn header(&mut self, name: &str, value: impl Into<String>, replace: bool) {
        if replace {
            self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        }
        self.headers.push((name.to_string(), value.into()));
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append a `Link: <url>; rel="rel"; k="v"` header.
    pub fn link_header(&mut self, rel: &str, url: &str, attributes: &[(&str, &str)]) {
        let mut value = format!("<{url}>; rel=\"{}\"", quote_escape(rel));
        for (k, v) in attributes {
            value.push_str(&format!("; {k}=\"{}\"", quote_escape(v)));
        }
        self.header("Link", value, false);
    }

    // -------------------------------------------------------------------------
    // Relation links
    // -------------------------------------------------------------------------

    pub fn add_link(&mut self, rel: &str, link: Link) {
        self.links.entry(rel.to_string()).or_default().push(link);
    }

    pub fn add_links(&mut self, links: Links) {
        for (rel, targets) in links {
            self.links.entry(rel).or_default().extend(targets);
        }
    }

    #[must_use]
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// `_links` value. Compact form folds API relations into `wp:` and adds
    /// the `curies` entry.
    #[must_use]
    pub fn links_json(&self, compact: bool) -> Value {
        let mut out = Map::new();
        let mut used_curie = false;
        for (rel, targets) in &self.links {
            let name = match rel.strip_prefix(API_REL_BASE) {
                Some(short) if compact => {
                    used_curie = true;
                    format!("wp:{short}")
                }
                _ => rel.clone(),
            };
            out.insert(name, Value::Array(targets.iter().map(Link::to_json).collect()));
        }
        if used_curie {
            out.insert(
                "curies".into(),
                json!([{
                    "name": "wp",
                    "href": format!("{API_REL_BASE}{{rel}}"),
                    "templated": true,
                }]),
            );
        }
        Value::Object(out)
    }

    /// Data with `_links` merged in. An existing `_links` key is kept.
    #[must_use]
    pub fn into_data(self) -> Value {
        if self.links.is_empty() {
            return self.data;
        }
        let links = self.links_json(true);
        match self.data {
            Value::Object(mut map) => {
                if !map.contains_key("_links") {
                    map.insert("_links".into(), links);
                }
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Flatten for embedding in a collection body.
    #[must_use]
    pub fn into_collection_item(self) -> Value {
        self.into_data()
    }
}

/// Backslash-escape a value for use inside a quoted header parameter.
fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn api_rels_are_compacted() {
        let mut response = Response::new(json!({"id": 3}));
        response.add_link("self", Link::new("http://x/wp-json/wp/v2/posts/3"));
        response.add_link(
            "https://api.w.org/term",
            Link::new("http://x/wp-json/wp/v2/tags?post=3")
                .attr("taxonomy", json!("post_tag"))
                .attr("embeddable", json!(true)),
        );
        let data = response.into_collection_item();
        let links = &data["_links"];
        assert_eq!(links["self"][0]["href"], json!("http://x/wp-json/wp/v2/posts/3"));
        assert_eq!(links["wp:term"][0]["taxonomy"], json!("post_tag"));
        assert_eq!(links["curies"][0]["name"], json!("wp"));
        assert_eq!(links["curies"][0]["href"], json!("https://api.w.org/{rel}"));
    }

    #[test]
    fn existing_links_key_is_not_overwritten() {
        let mut response = Response::new(json!({"_links": "mine"}));
        response.add_link("self", Link::new("http://x"));
        assert_eq!(response.into_data()["_links"], json!("mine"));
    }

    #[test]
    fn link_attributes_escape_quotes() {
        let mut response = Response::default();
        response.link_header("alternate", "http://x/p", &[("title", r#"Say "hi" \ bye"#)]);
        assert_eq!(
            response.get_header("Link"),
            Some(r#"<http://x/p>; rel="alternate"; title="Say \"hi\" \\ bye""#)
        );
    }

    #[test]
    fn headers_append_or_replace() {
        let mut response = Response::default();
        response.link_header("next", "http://x/?page=2", &[]);
        response.link_header("alternate", "http://x/p", &[("type", "text/html")]);
        assert_eq!(
            response.headers().iter().filter(|(k, _)| k == "Link").count(),
            2
        );
        assert_eq!(
            response.headers()[1].1,
            "<http://x/p>; rel=\"alternate\"; type=\"text/html\""
        );

        response.header("X-WP-Total", "1", true);
        response.header("X-WP-Total", "2", true);
        assert_eq!(response.get_header("x-wp-total"), Some("2"));
    }

    #[test]
    fn errors_carry_status() {
        let response = Response::from_error(&RestError::forbidden(401));
        assert_eq!(response.status(), 401);
        assert!(response.is_error());
        assert_eq!(response.data()["data"]["status"], json!(401));
    }
}
