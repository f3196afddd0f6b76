//! CloudEvents v1.0 envelope over HTTP
//!
//! Binary mode carries the attributes in `ce-*` headers and the data as the
//! body. Structured mode (`application/cloudevents+json`) carries everything
//! in one JSON document. Both are accepted inbound; outbound is always binary.

use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const SPEC_VERSION: &str = "1.0";
pub const JSON: &str = "application/json";
pub const STRUCTURED: &str = "application/cloudevents+json";

const CE_SPECVERSION: &str = "ce-specversion";
const CE_ID: &str = "ce-id";
const CE_TYPE: &str = "ce-type";
const CE_SOURCE: &str = "ce-source";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Missing event attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Event carries no data")]
    MissingData,

    #[error("Invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub specversion: String,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// New event with a random id and no data.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            datacontenttype: None,
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, EventError> {
        self.data = Some(serde_json::to_value(data)?);
        self.datacontenttype = Some(JSON.to_string());
        Ok(self)
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        let data = self.data.clone().ok_or(EventError::MissingData)?;
        Ok(serde_json::from_value(data)?)
    }

    /// Parse an event received over HTTP, in either content mode.
    pub fn from_http(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventError> {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if content_type.as_deref().is_some_and(|ct| ct.starts_with(STRUCTURED)) {
            return Ok(serde_json::from_slice(body)?);
        }

        let attr = |name: &'static str| -> Result<String, EventError> {
            let value = headers.get(name).ok_or(EventError::MissingAttribute(name))?;
            value
                .to_str()
                .map(str::to_string)
                .map_err(|e| EventError::InvalidHeader(format!("{}: {}", name, e)))
        };

        let data = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(body)?)
        };

        Ok(Self {
            specversion: attr(CE_SPECVERSION)?,
            id: attr(CE_ID)?,
            event_type: attr(CE_TYPE)?,
            source: attr(CE_SOURCE)?,
            datacontenttype: content_type,
            data,
        })
    }

    /// Binary-mode headers and body.
    pub fn to_http(&self) -> Result<(HeaderMap, Vec<u8>), EventError> {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| -> Result<(), EventError> {
            let value = HeaderValue::from_str(value)
                .map_err(|e| EventError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(HeaderName::from_static(name), value);
            Ok(())
        };
        put(CE_SPECVERSION, &self.specversion)?;
        put(CE_ID, &self.id)?;
        put(CE_TYPE, &self.event_type)?;
        put(CE_SOURCE, &self.source)?;

        let body = match &self.data {
            Some(data) => {
                let content_type = self.datacontenttype.as_deref().unwrap_or(JSON);
                put("content-type", content_type)?;
                serde_json::to_vec(data)?
            }
            None => Vec::new(),
        };
        Ok((headers, body))
    }

    /// Whether a binary-mode response carries an event at all.
    pub fn present_in(headers: &HeaderMap, body: &[u8]) -> bool {
        !body.is_empty() || headers.contains_key(CE_ID)
    }
}
