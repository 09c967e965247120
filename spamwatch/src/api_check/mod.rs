//! API detection capability.
//!
//! An [`ApiServiceDbModel`] describes how to ask a third-party endpoint about a number:
//! method, URL/body templates with `{phone}` / `{digits}` placeholders, header templates,
//! and where in the JSON response to find the text and labels to match against.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::database::models::ApiServiceDbModel;
use crate::domain::PhoneNumber;
use crate::{Error, Result};

/// What one API probe returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiCheckResponse {
    pub raw_response: String,
    /// Text keywords are matched against.
    pub extracted_text: String,
    /// Labels the provider itself reported.
    pub extracted_keywords: Vec<String>,
}

#[async_trait]
pub trait ApiChecker: Send + Sync {
    async fn check(&self, api: &ApiServiceDbModel, phone: &PhoneNumber) -> Result<ApiCheckResponse>;
}

/// `reqwest`-based checker.
pub struct HttpApiChecker {
    client: Client,
    default_timeout: Duration,
}

impl HttpApiChecker {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = crate::http::client_builder(default_timeout).build()?;
        Ok(Self {
            client,
            default_timeout,
        })
    }

    pub fn with_client(client: Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }
}

#[async_trait]
impl ApiChecker for HttpApiChecker {
    async fn check(&self, api: &ApiServiceDbModel, phone: &PhoneNumber) -> Result<ApiCheckResponse> {
        let url = render_template(&api.url_template, phone, true);
        let method = reqwest::Method::from_bytes(api.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::config(format!("invalid HTTP method '{}' for {}", api.method, api.name)))?;
        let timeout = api
            .timeout_secs
            .filter(|s| *s > 0)
            .map(|s| Duration::from_secs(s as u64))
            .unwrap_or(self.default_timeout);

        let mut request = self.client.request(method, &url).timeout(timeout);

        let headers: HashMap<String, String> = if api.headers.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&api.headers)?
        };
        for (name, value) in &headers {
            request = request.header(name.as_str(), render_template(value, phone, false));
        }

        if let Some(body) = api.body_template.as_deref().filter(|b| !b.is_empty()) {
            request = request.body(render_template(body, phone, false));
        }

        debug!(api = %api.name, url = %url, "Calling detection API");
        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(Error::Other(format!(
                "{} responded with {}: {}",
                api.name,
                status,
                truncate(&raw, 200)
            )));
        }

        Ok(extract_response(
            &raw,
            api.text_path.as_deref(),
            api.keywords_path.as_deref(),
        ))
    }
}

/// Substitute `{phone}` and `{digits}`; URL templates get percent-encoded values.
pub fn render_template(template: &str, phone: &PhoneNumber, url_encode: bool) -> String {
    let encode = |v: &str| -> String {
        if url_encode {
            url::form_urlencoded::byte_serialize(v.as_bytes()).collect()
        } else {
            v.to_string()
        }
    };
    template
        .replace("{phone}", &encode(phone.as_str()))
        .replace("{digits}", &encode(phone.digits()))
}

/// Pull text and labels out of a response body.
///
/// Non-JSON bodies are matched as plain text. Without a `text_path` the whole body is used.
pub fn extract_response(
    raw: &str,
    text_path: Option<&str>,
    keywords_path: Option<&str>,
) -> ApiCheckResponse {
    let Ok(json) = serde_json::from_str::<Value>(raw) else {
        return ApiCheckResponse {
            raw_response: raw.to_string(),
            extracted_text: raw.to_string(),
            extracted_keywords: Vec::new(),
        };
    };

    let extracted_text = match text_path.filter(|p| !p.is_empty()) {
        Some(path) => lookup(&json, path).map(value_to_text).unwrap_or_default(),
        None => raw.to_string(),
    };

    let extracted_keywords = keywords_path
        .filter(|p| !p.is_empty())
        .and_then(|path| lookup(&json, path))
        .map(|value| match value {
            Value::Array(items) => items
                .iter()
                .map(value_to_text)
                .filter(|s| !s.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            other => vec![value_to_text(other)],
        })
        .unwrap_or_default();

    ApiCheckResponse {
        raw_response: raw.to_string(),
        extracted_text,
        extracted_keywords,
    }
}

/// JSON pointer (`/a/0/b`) or dotted path (`a.0.b`).
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.starts_with('/') {
        return value.pointer(path);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
