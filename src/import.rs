use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::models::DiscoveredEvent;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no import endpoint configured")]
    MissingEndpoint,
    #[error("http error: {0}")]
    Http(String),
    #[error("import api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("unreadable import response: {0}")]
    Decode(String),
}

/// Client for the external import backend.
pub struct ImportClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery<'a> {
    id: &'a str,
    venue_slug: &'a str,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    results: Vec<EventStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventStatus {
    pub id: String,
    pub venue_slug: String,
    pub exists: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub snapshot: Option<EventSnapshot>,
}

/// Mutable fields of an already-imported event, as the backend last saw them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSnapshot {
    pub price: Option<String>,
    pub age_restriction: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    pub is_sold_out: Option<bool>,
    pub is_cancelled: Option<bool>,
    pub artists: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub pending_review: usize,
    pub updated: usize,
    pub errors: usize,
    pub messages: Vec<String>,
}

impl ImportReport {
    pub fn classified(&self) -> Vec<(MessageKind, &str)> {
        self.messages
            .iter()
            .map(|line| (MessageKind::classify(line), line.as_str()))
            .collect()
    }
}

/// Prefix vocabulary of the backend's message log.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Imported,
    Duplicate,
    Error,
    Rejected,
    Info,
}

impl MessageKind {
    pub fn classify(line: &str) -> Self {
        let upper = line.trim_start().to_uppercase();
        if upper.starts_with("IMPORTED") || upper.starts_with("WOULD IMPORT") {
            MessageKind::Imported
        } else if upper.starts_with("DUPLICATE") {
            MessageKind::Duplicate
        } else if upper.starts_with("ERROR") || upper.starts_with("SKIP") {
            MessageKind::Error
        } else if upper.starts_with("REJECTED") {
            MessageKind::Rejected
        } else {
            MessageKind::Info
        }
    }
}

impl ImportClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, ImportError> {
        let base_url = config
            .import_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ImportError::MissingEndpoint)?;
        let api_key = config
            .import_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        Ok(Self::new(base_url, api_key))
    }

    /// Existence, lifecycle status and a field snapshot per `(id, venue slug)`.
    pub async fn check_status(&self, events: &[(String, String)]) -> Result<Vec<EventStatus>, ImportError> {
        let query: Vec<StatusQuery<'_>> = events
            .iter()
            .map(|(id, venue_slug)| StatusQuery { id, venue_slug })
            .collect();
        let response: StatusResponse = self
            .post("events/check", &json!({ "events": query }))
            .await?;
        debug!(checked = events.len(), found = response.results.len(), "status check");
        Ok(response.results)
    }

    pub async fn import(&self, events: &[DiscoveredEvent], dry_run: bool) -> Result<ImportReport, ImportError> {
        let report: ImportReport = self
            .post("events/import", &import_payload(events, dry_run))
            .await?;
        info!(
            dry_run,
            total = report.total,
            imported = report.imported,
            duplicates = report.duplicates,
            errors = report.errors,
            "import finished"
        );
        Ok(report)
    }

    async fn post<R: DeserializeOwned>(&self, path: &str, payload: &Value) -> Result<R, ImportError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.client.post(url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ImportError::Http(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ImportError::Http(err.to_string()))?;
        if !status.is_success() {
            return Err(ImportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|err| ImportError::Decode(err.to_string()))
    }
}

fn import_payload(events: &[DiscoveredEvent], dry_run: bool) -> Value {
    json!({ "events": events, "dryRun": dry_run })
}

/// Names of the mutable fields whose scraped value differs from the snapshot.
pub fn changed_fields(snapshot: &EventSnapshot, event: &DiscoveredEvent) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if snapshot.price != event.price {
        changed.push("price");
    }
    if snapshot.age_restriction != event.age_restriction {
        changed.push("ageRestriction");
    }
    if snapshot.description != event.description {
        changed.push("description");
    }
    if snapshot.date.as_deref() != Some(event.date.as_str()) {
        changed.push("date");
    }
    if snapshot.is_sold_out.unwrap_or(false) != event.is_sold_out.unwrap_or(false) {
        changed.push("isSoldOut");
    }
    if snapshot.is_cancelled.unwrap_or(false) != event.is_cancelled.unwrap_or(false) {
        changed.push("isCancelled");
    }
    if snapshot.artists.as_ref() != Some(&event.artists) {
        changed.push("artists");
    }
    changed
}
