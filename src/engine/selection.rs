use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use tracing::{debug, warn};

use crate::advisory::{AdvisoryError, AdvisoryRequest, CandidateContext};
use crate::limits::MAX_CANDIDATES;
use crate::model::*;

use super::Engine;

/// Everything about a request the advisor may weigh.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub restaurant_name: String,
    pub party_size: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_hours: u32,
    pub occasion: Option<String>,
    pub preferences: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub table: Table,
    pub info: SelectionInfo,
}

const UNKNOWN_TABLE_CONFIDENCE: f64 = 0.5;
const FAILURE_CONFIDENCE: f64 = 0.2;

impl Engine {
    /// Pick one of `candidates`, asking the advisor first. Never fails for
    /// advisory reasons; `None` only for an empty candidate list.
    pub async fn select(&self, candidates: &[Table], ctx: &SelectionContext) -> Option<Selection> {
        let first = candidates.first()?;
        let request = self.advisory_request(candidates, ctx).await;

        let started = Instant::now();
        let timeout = self.settings.advisory_timeout;
        let outcome = match tokio::time::timeout(timeout, self.advisor.suggest(&request)).await {
            Ok(result) => result,
            Err(_) => Err(AdvisoryError::Timeout(timeout)),
        };
        let elapsed = started.elapsed();
        let response_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        metrics::histogram!(crate::observability::ADVISORY_DURATION_SECONDS).record(elapsed.as_secs_f64());

        let outcome = outcome.and_then(|s| match candidates.iter().find(|t| t.id == s.table_id) {
            Some(table) => Ok((table, s)),
            None => Err(AdvisoryError::UnknownTable(s.table_id)),
        });

        let selection = match outcome {
            Ok((table, suggestion)) => {
                debug!(table = %table.id, confidence = suggestion.confidence, "advisor picked table");
                Selection {
                    table: table.clone(),
                    info: SelectionInfo {
                        method: SelectionMethod::Advisory,
                        reasoning: suggestion.reasoning,
                        confidence: suggestion.confidence,
                        response_time_ms,
                        factors_considered: suggestion.factors_considered,
                        alternative_table_id: suggestion.alternative_table_id,
                        failure: None,
                    },
                }
            }
            Err(err) => {
                warn!(error = %err, fallback = %first.id, "advisory selection failed, using first candidate");
                let confidence = match err {
                    AdvisoryError::UnknownTable(_) => UNKNOWN_TABLE_CONFIDENCE,
                    _ => FAILURE_CONFIDENCE,
                };
                Selection {
                    table: first.clone(),
                    info: SelectionInfo {
                        method: SelectionMethod::Fallback,
                        reasoning: format!("defaulted to table {}", first.table_number),
                        confidence,
                        response_time_ms,
                        factors_considered: vec!["fallback_selection".into()],
                        alternative_table_id: None,
                        failure: Some(err.to_string()),
                    },
                }
            }
        };

        metrics::counter!(crate::observability::SELECTIONS_TOTAL, "method" => selection.info.method.as_str())
            .increment(1);
        Some(selection)
    }

    async fn advisory_request(&self, candidates: &[Table], ctx: &SelectionContext) -> AdvisoryRequest {
        let mut contexts = Vec::with_capacity(candidates.len().min(MAX_CANDIDATES));
        for table in candidates.iter().take(MAX_CANDIDATES) {
            let utilization = f64::from(ctx.party_size) / f64::from(table.capacity.max(1)) * 100.0;
            contexts.push(CandidateContext {
                id: table.id,
                table_number: table.table_number.clone(),
                capacity: table.capacity,
                floor: table.floor.clone(),
                recent_bookings: self.recent_bookings(table.id, ctx.date).await,
                capacity_utilization: (utilization * 10.0).round() / 10.0,
            });
        }
        AdvisoryRequest {
            restaurant_name: ctx.restaurant_name.clone(),
            party_size: ctx.party_size,
            date: ctx.date,
            time: ctx.time,
            duration_hours: ctx.duration_hours,
            occasion: ctx.occasion.clone(),
            preferences: ctx.preferences.clone(),
            candidates: contexts,
        }
    }
}
