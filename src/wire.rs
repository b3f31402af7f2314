//! JSON-lines protocol over TCP.
//!
//! Each request is one JSON object on one line, tagged by `"op"`. Each reply
//! is one line: `{"ok":true,"data":...}` or
//! `{"ok":false,"code":"...","message":"..."}`. After `listen`, reservation
//! events of that restaurant are interleaved as `{"notify":"<id>","payload":{...}}`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveTime};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::access::{self, Requester};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    AvailableTables {
        restaurant_id: Ulid,
        date: NaiveDate,
        #[serde(with = "hhmm")]
        time: NaiveTime,
        duration_hours: u32,
        party_size: u32,
        #[serde(default)]
        floor: Option<Floor>,
    },
    TablesByFloor {
        restaurant_id: Ulid,
        date: NaiveDate,
        #[serde(with = "hhmm")]
        time: NaiveTime,
        duration_hours: u32,
        party_size: u32,
    },
    TimeSlots {
        restaurant_id: Ulid,
        date: NaiveDate,
        party_size: u32,
        duration_hours: u32,
    },
    Durations {
        restaurant_id: Ulid,
        date: NaiveDate,
        #[serde(with = "hhmm")]
        time: NaiveTime,
        party_size: u32,
    },
    Dates {
        restaurant_id: Ulid,
        party_size: u32,
        #[serde(default)]
        horizon_days: Option<u32>,
    },
    Reserve(ReserveRequest),
    Approve {
        requester: Requester,
        reservation_id: Ulid,
    },
    Reject {
        requester: Requester,
        reservation_id: Ulid,
    },
    Cancel {
        requester: Requester,
        reservation_id: Ulid,
    },
    GetReservation {
        reservation_id: Ulid,
    },
    CustomerReservations {
        customer_id: Ulid,
    },
    TableReservations {
        table_id: Ulid,
        date: NaiveDate,
    },
    SelectionRecord {
        reservation_id: Ulid,
    },
    RegisterRestaurant {
        requester: Requester,
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
        #[serde(with = "hhmm")]
        opening_time: NaiveTime,
        #[serde(with = "hhmm")]
        closing_time: NaiveTime,
    },
    RegisterTable {
        requester: Requester,
        restaurant_id: Ulid,
        #[serde(default)]
        id: Option<Ulid>,
        table_number: String,
        capacity: u32,
        #[serde(default)]
        floor: Floor,
    },
    SetTableActive {
        requester: Requester,
        table_id: Ulid,
        active: bool,
    },
    Listen {
        restaurant_id: Ulid,
    },
    Unlisten {
        restaurant_id: Ulid,
    },
    Ping,
}

/// `reserve` picks its commit mode from the fields present: `table_id` reserves
/// that table, `candidates` lets the advisor choose among them, neither lets
/// the advisor choose among every free table (optionally on `floor`).
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    pub requester: Requester,
    pub restaurant_id: Ulid,
    pub party_size: u32,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration_hours: u32,
    #[serde(default)]
    pub table_id: Option<Ulid>,
    #[serde(default)]
    pub candidates: Option<Vec<Ulid>>,
    #[serde(default)]
    pub floor: Option<Floor>,
    #[serde(default)]
    pub special_requests: Option<String>,
    #[serde(default)]
    pub occasion: Option<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
}

/// Per-connection `listen` subscriptions, each forwarding into the connection's event queue.
struct Listeners {
    tx: mpsc::Sender<(Ulid, ReservationEvent)>,
    tasks: HashMap<Ulid, JoinHandle<()>>,
}

impl Listeners {
    fn listen(&mut self, engine: &Engine, restaurant_id: Ulid) {
        let mut rx = engine.notify.subscribe(restaurant_id);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send((restaurant_id, event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(restaurant = %restaurant_id, skipped, "listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.tasks.insert(restaurant_id, task) {
            previous.abort();
        }
    }

    fn unlisten(&mut self, restaurant_id: &Ulid) -> bool {
        match self.tasks.remove(restaurant_id) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut events) = mpsc::channel(EVENT_BUFFER);
    let mut listeners = Listeners {
        tx,
        tasks: HashMap::new(),
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        framed.send(error_reply("bad_request", "line too long")).await?;
                        break;
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&engine, &line, &mut listeners).await;
                framed.send(reply.to_string()).await?;
            }
            Some((restaurant_id, event)) = events.recv() => {
                let line = json!({ "notify": restaurant_id, "payload": event });
                framed.send(line.to_string()).await?;
            }
        }
    }
    Ok(())
}

async fn handle_line(engine: &Engine, line: &str, listeners: &mut Listeners) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => "invalid", "status" => "error")
                .increment(1);
            return json!({ "ok": false, "code": "bad_request", "message": e.to_string() });
        }
    };

    let label = crate::observability::request_label(&request);
    let started = Instant::now();
    let result = dispatch(engine, request, listeners).await;
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => label)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => label, "status" => "ok").increment(1);
            json!({ "ok": true, "data": data })
        }
        Err(e) => {
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => label, "status" => "error").increment(1);
            debug!(op = label, error = %e, "request failed");
            json!({ "ok": false, "code": e.code(), "message": e.to_string() })
        }
    }
}

fn error_reply(code: &str, message: &str) -> String {
    json!({ "ok": false, "code": code, "message": message }).to_string()
}

async fn dispatch(engine: &Engine, request: Request, listeners: &mut Listeners) -> Result<Value, EngineError> {
    match request {
        Request::AvailableTables {
            restaurant_id,
            date,
            time,
            duration_hours,
            party_size,
            floor,
        } => {
            let window = window(date, time, duration_hours)?;
            let tables = engine
                .available_tables(restaurant_id, &window, party_size, floor.as_ref())
                .await?;
            Ok(json!(tables))
        }
        Request::TablesByFloor {
            restaurant_id,
            date,
            time,
            duration_hours,
            party_size,
        } => {
            let window = window(date, time, duration_hours)?;
            Ok(json!(engine.tables_by_floor(restaurant_id, &window, party_size).await?))
        }
        Request::TimeSlots {
            restaurant_id,
            date,
            party_size,
            duration_hours,
        } => Ok(json!(
            engine
                .available_time_slots(restaurant_id, date, party_size, duration_hours)
                .await?
        )),
        Request::Durations {
            restaurant_id,
            date,
            time,
            party_size,
        } => Ok(json!(
            engine.available_durations(restaurant_id, date, time, party_size).await?
        )),
        Request::Dates {
            restaurant_id,
            party_size,
            horizon_days,
        } => Ok(json!(
            engine.available_dates(restaurant_id, party_size, horizon_days).await?
        )),
        Request::Reserve(reserve) => {
            let table_id = reserve.table_id;
            let candidates = reserve.candidates.clone();
            let floor = reserve.floor.clone();
            let request = reservation_request(reserve)?;
            let outcome = match (table_id, candidates) {
                (Some(table_id), _) => engine.commit_direct(&request, table_id).await?,
                (None, Some(candidates)) => engine.commit_advisory(&request, &candidates).await?,
                (None, None) => engine.reserve_smart(&request, floor.as_ref()).await?,
            };
            Ok(json!(outcome))
        }
        Request::Approve {
            requester,
            reservation_id,
        } => Ok(json!(engine.approve(&requester, reservation_id).await?)),
        Request::Reject {
            requester,
            reservation_id,
        } => Ok(json!(engine.reject(&requester, reservation_id).await?)),
        Request::Cancel {
            requester,
            reservation_id,
        } => Ok(json!(engine.cancel(&requester, reservation_id).await?)),
        Request::GetReservation { reservation_id } => Ok(json!(engine.get_reservation(reservation_id).await?)),
        Request::CustomerReservations { customer_id } => {
            Ok(json!(engine.list_reservations_for_customer(customer_id).await))
        }
        Request::TableReservations { table_id, date } => {
            Ok(json!(engine.list_reservations_for_table(table_id, date).await?))
        }
        Request::SelectionRecord { reservation_id } => {
            let record = engine
                .selection_record(reservation_id)
                .ok_or_else(|| EngineError::not_found("selection record", reservation_id))?;
            Ok(json!(record))
        }
        Request::RegisterRestaurant {
            requester,
            id,
            name,
            opening_time,
            closing_time,
        } => {
            access::ensure_super_admin(&requester)?;
            let restaurant = engine.register_restaurant(Restaurant {
                id: id.unwrap_or_else(Ulid::new),
                name,
                opening_time,
                closing_time,
                is_active: true,
            })?;
            Ok(json!(restaurant))
        }
        Request::RegisterTable {
            requester,
            restaurant_id,
            id,
            table_number,
            capacity,
            floor,
        } => {
            access::ensure_manager(&requester, restaurant_id)?;
            let table = engine.register_table(Table {
                id: id.unwrap_or_else(Ulid::new),
                restaurant_id,
                table_number,
                capacity,
                floor,
                is_active: true,
            })?;
            Ok(json!(table))
        }
        Request::SetTableActive {
            requester,
            table_id,
            active,
        } => {
            let table = engine
                .table(table_id)
                .ok_or_else(|| EngineError::not_found("table", table_id))?;
            access::ensure_manager(&requester, table.restaurant_id)?;
            Ok(json!(engine.set_table_active(table_id, active)?))
        }
        Request::Listen { restaurant_id } => {
            if engine.restaurant(restaurant_id).is_none() {
                return Err(EngineError::not_found("restaurant", restaurant_id));
            }
            listeners.listen(engine, restaurant_id);
            Ok(json!({ "listening": restaurant_id }))
        }
        Request::Unlisten { restaurant_id } => Ok(json!({ "removed": listeners.unlisten(&restaurant_id) })),
        Request::Ping => Ok(json!("pong")),
    }
}

fn window(date: NaiveDate, time: NaiveTime, duration_hours: u32) -> Result<Window, EngineError> {
    if duration_hours == 0 {
        return Err(EngineError::Validation("duration_hours must be at least 1".into()));
    }
    Ok(Window::new(date, time, duration_hours))
}

fn reservation_request(reserve: ReserveRequest) -> Result<ReservationRequest, EngineError> {
    Ok(ReservationRequest {
        restaurant_id: reserve.restaurant_id,
        requester: reserve.requester,
        party_size: reserve.party_size,
        window: window(reserve.date, reserve.time, reserve.duration_hours)?,
        special_requests: reserve.special_requests,
        occasion: reserve.occasion.filter(|s| !s.trim().is_empty()),
        preferences: flatten_preferences(reserve.preferences),
    })
}

/// Preferences arrive as arbitrary JSON values. Unset and `false` entries are dropped.
fn flatten_preferences(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null | Value::Bool(false) => return None,
                Value::Bool(true) => "yes".to_string(),
                Value::String(s) if s.trim().is_empty() => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reserve_modes() {
        let rid = Ulid::new();
        let customer = Ulid::new();
        let line = format!(
            r#"{{"op":"reserve","requester":{{"id":"{customer}","role":"customer"}},"restaurant_id":"{rid}","party_size":2,"date":"2025-06-01","time":"19:00","duration_hours":2,"preferences":{{"quiet_area":true,"window_seat":false,"seating":"booth"}}}}"#
        );
        let Request::Reserve(reserve) = serde_json::from_str::<Request>(&line).unwrap() else {
            panic!("expected reserve");
        };
        assert!(reserve.table_id.is_none());
        assert!(reserve.candidates.is_none());
        let request = reservation_request(reserve).unwrap();
        assert_eq!(request.window.to_string(), "2025-06-01 19:00-21:00");
        assert_eq!(request.preferences.len(), 2);
        assert_eq!(request.preferences["quiet_area"], "yes");
        assert_eq!(request.preferences["seating"], "booth");
    }

    #[test]
    fn parses_unit_and_optional_fields() {
        assert!(matches!(serde_json::from_str::<Request>(r#"{"op":"ping"}"#).unwrap(), Request::Ping));
        let rid = Ulid::new();
        let line = format!(r#"{{"op":"dates","restaurant_id":"{rid}","party_size":4}}"#);
        match serde_json::from_str::<Request>(&line).unwrap() {
            Request::Dates { horizon_days, .. } => assert_eq!(horizon_days, None),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_time() {
        let rid = Ulid::new();
        let line = format!(
            r#"{{"op":"durations","restaurant_id":"{rid}","date":"2025-06-01","time":"7pm","party_size":2}}"#
        );
        assert!(serde_json::from_str::<Request>(&line).is_err());
    }

    #[test]
    fn zero_duration_is_validation_error() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let time = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        assert!(matches!(window(date, time, 0), Err(EngineError::Validation(_))));
    }

    #[test]
    fn label_covers_request() {
        let req: Request = serde_json::from_str(r#"{"op":"ping"}"#).unwrap();
        assert_eq!(crate::observability::request_label(&req), "ping");
    }
}
