//! Vendor API clients.
//!
//! Each submodule owns one vendor's response structures, URL construction
//! and the normalizer that turns a decoded response into canonical
//! readings. Network access goes through the `Transport` trait so the
//! normalizers and the pipeline can be exercised with canned bodies.
//!
//! Submodules:
//! - `purpleair`: particulate network (`www.purpleair.com/json`).
//! - `awair`: indoor monitors (`developer-apis.awair.is`).

pub mod awair;
pub mod purpleair;

use serde::{Deserialize, Deserializer};

use crate::model::PipelineError;

/// Blocking HTTP GET returning the response body.
pub trait Transport {
    fn get_text(&self, url: &str, bearer_token: Option<&str>) -> Result<String, PipelineError>;
}

impl Transport for reqwest::blocking::Client {
    fn get_text(&self, url: &str, bearer_token: Option<&str>) -> Result<String, PipelineError> {
        let mut request = self.get(url).header("Accept", "application/json");
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|e| PipelineError::SourceUnavailable(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .text()
            .map_err(|e| PipelineError::SourceUnavailable(format!("reading body from {} failed: {}", url, e)))
    }
}

/// HTTP client shared by every source for one run.
pub fn build_client() -> Result<reqwest::blocking::Client, PipelineError> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("aqmon_service/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::SourceUnavailable(format!("HTTP client setup failed: {}", e)))
}

/// Decode a JSON body, mapping failures to `MalformedPayload`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, PipelineError> {
    serde_json::from_str(body).map_err(|e| PipelineError::MalformedPayload(format!("{}: {}", what, e)))
}

/// Vendors are inconsistent about numeric ids: accept `123` or `"123"`.
pub(crate) fn deserialize_numeric_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Like `deserialize_numeric_id`, but anything that is not a usable id
/// (null, a non-numeric string, an object) becomes `None` instead of
/// failing the whole document.
pub(crate) fn deserialize_lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
