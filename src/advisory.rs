//! Table advisors: external services that suggest which free table to give a party.
//!
//! An advisor only ever *suggests*. The engine validates the answer against
//! the candidate list and falls back to the first candidate on any failure,
//! so nothing here can make a commit fail.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use ulid::Ulid;

use crate::model::{Floor, hhmm};

/// What an advisor sees about each candidate table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateContext {
    pub id: Ulid,
    pub table_number: String,
    pub capacity: u32,
    pub floor: Floor,
    /// Confirmed or completed reservations on this table in the preceding 30 days.
    pub recent_bookings: usize,
    /// Party size as a percentage of capacity, one decimal.
    pub capacity_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryRequest {
    pub restaurant_name: String,
    pub party_size: u32,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration_hours: u32,
    pub occasion: Option<String>,
    pub preferences: BTreeMap<String, String>,
    pub candidates: Vec<CandidateContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorySuggestion {
    pub table_id: Ulid,
    pub reasoning: String,
    pub confidence: f64,
    pub alternative_table_id: Option<Ulid>,
    pub factors_considered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdvisoryError {
    #[error("no advisor configured")]
    Unavailable,
    #[error("advisor did not answer within {0:?}")]
    Timeout(Duration),
    #[error("advisor transport error: {0}")]
    Transport(String),
    #[error("advisor returned HTTP {0}")]
    Status(u16),
    #[error("malformed advisor response: {0}")]
    Malformed(String),
    #[error("advisor suggested table {0}, which is not a candidate")]
    UnknownTable(Ulid),
}

#[async_trait]
pub trait TableAdvisor: Send + Sync {
    /// Must not have side effects; it may be abandoned at any point.
    async fn suggest(&self, request: &AdvisoryRequest) -> Result<AdvisorySuggestion, AdvisoryError>;
}

/// Used when no advisory endpoint is configured: every commit falls back.
#[derive(Debug, Default)]
pub struct NoAdvisor;

#[async_trait]
impl TableAdvisor for NoAdvisor {
    async fn suggest(&self, _request: &AdvisoryRequest) -> Result<AdvisorySuggestion, AdvisoryError> {
        Err(AdvisoryError::Unavailable)
    }
}

// ── Chat-completion advisor ──────────────────────────────────────

const SYSTEM_PROMPT: &str = "You pick restaurant tables. Reply with a single JSON object and nothing else.";
const MAX_TOKENS: u32 = 400;
const TEMPERATURE: f64 = 0.2;
/// Used when the model omits a confidence score.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Advisor backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionAdvisor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionAdvisor {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl TableAdvisor for ChatCompletionAdvisor {
    async fn suggest(&self, request: &AdvisoryRequest) -> Result<AdvisorySuggestion, AdvisoryError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(request) },
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AdvisoryError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AdvisoryError::Status(status.as_u16()));
        }
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdvisoryError::Malformed(e.to_string()))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AdvisoryError::Malformed("missing choices[0].message.content".into()))?;
        debug!(len = content.len(), "advisor replied");
        parse_suggestion(content)
    }
}

/// User message sent to the model: reservation details plus one JSON line per candidate.
pub fn build_prompt(request: &AdvisoryRequest) -> String {
    let preferences = if request.preferences.is_empty() {
        "none".to_string()
    } else {
        request
            .preferences
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let candidates = request
        .candidates
        .iter()
        .filter_map(|c| serde_json::to_string(c).ok())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Choose one table at {restaurant} for this reservation.\n\
         Party size: {party}\n\
         Date: {date}\n\
         Time: {time}\n\
         Duration: {hours} hours\n\
         Occasion: {occasion}\n\
         Preferences: {preferences}\n\
         \n\
         Candidate tables:\n{candidates}\n\
         \n\
         Prefer 80-100% capacity utilization and avoid oversized tables. \
         Spread bookings across tables with fewer recent bookings. \
         Favour quieter or better placed tables for special occasions.\n\
         \n\
         Answer with exactly:\n\
         {{\"selected_table_id\": \"<id>\", \"reasoning\": \"...\", \"confidence\": 0.0-1.0, \
         \"alternative_table_id\": \"<id>\" or null, \"factors_considered\": [\"...\"]}}\n\
         Only ids from the candidate list are valid.",
        restaurant = request.restaurant_name,
        party = request.party_size,
        date = request.date,
        time = request.time.format("%H:%M"),
        hours = request.duration_hours,
        occasion = request.occasion.as_deref().unwrap_or("none"),
    )
}

#[derive(Deserialize)]
struct RawSuggestion {
    selected_table_id: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    alternative_table_id: Option<String>,
    #[serde(default)]
    factors_considered: Vec<String>,
}

/// Parse the model's reply. Accepts a bare JSON object or one embedded in
/// surrounding text (first `{` to last `}`).
pub fn parse_suggestion(content: &str) -> Result<AdvisorySuggestion, AdvisoryError> {
    let trimmed = content.trim();
    let raw: RawSuggestion = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(first) => {
            let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
                return Err(AdvisoryError::Malformed(first.to_string()));
            };
            if end <= start {
                return Err(AdvisoryError::Malformed(first.to_string()));
            }
            serde_json::from_str(&trimmed[start..=end]).map_err(|e| AdvisoryError::Malformed(e.to_string()))?
        }
    };

    let table_id = raw
        .selected_table_id
        .trim()
        .parse::<Ulid>()
        .map_err(|e| AdvisoryError::Malformed(format!("selected_table_id: {e}")))?;
    Ok(AdvisorySuggestion {
        table_id,
        reasoning: raw.reasoning.unwrap_or_else(|| "advisor selection".into()),
        confidence: raw.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
        alternative_table_id: raw.alternative_table_id.and_then(|s| s.trim().parse().ok()),
        factors_considered: raw.factors_considered,
    })
}
