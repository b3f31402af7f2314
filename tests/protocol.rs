use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use tablebook::advisory::NoAdvisor;
use tablebook::clock::FixedClock;
use tablebook::engine::{Engine, EngineSettings};
use tablebook::notify::NotifyHub;
use tablebook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let now = NaiveDate::from_ymd_opt(2025, 5, 31)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let clock = Arc::new(FixedClock::at_local(now, FixedOffset::east_opt(0).unwrap()));
    let engine = Arc::new(
        Engine::new(Arc::new(NoAdvisor), Arc::new(NotifyHub::new()), EngineSettings::default()).with_clock(clock),
    );

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.framed.send(line.to_string()).await.unwrap();
    }

    /// Next line from the server, or `None` on timeout.
    async fn recv(&mut self, timeout: Duration) -> Option<Value> {
        let line = tokio::time::timeout(timeout, self.framed.next()).await.ok()??.unwrap();
        Some(serde_json::from_str(&line).unwrap())
    }

    async fn call(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await;
        self.recv(Duration::from_secs(2)).await.expect("reply")
    }

    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], true, "request failed: {reply}");
        reply["data"].clone()
    }
}

fn super_admin() -> Value {
    json!({ "id": Ulid::new(), "role": "super_admin" })
}

fn customer(id: Ulid) -> Value {
    json!({ "id": id, "role": "customer" })
}

fn manager(restaurant_id: &Value) -> Value {
    json!({
        "id": Ulid::new(),
        "role": "staff",
        "staff": { "restaurant_id": restaurant_id, "position": "manager" }
    })
}

/// Registers a 09:00-22:00 restaurant with tables "1" (2 seats) and "2" (4 seats, terrace).
async fn seed(client: &mut Client) -> (Value, Value, Value) {
    let restaurant = client
        .ok(json!({
            "op": "register_restaurant",
            "requester": super_admin(),
            "name": "Harbour Grill",
            "opening_time": "09:00",
            "closing_time": "22:00"
        }))
        .await;
    let rid = restaurant["id"].clone();
    let small = client
        .ok(json!({
            "op": "register_table",
            "requester": manager(&rid),
            "restaurant_id": rid,
            "table_number": "1",
            "capacity": 2
        }))
        .await;
    let large = client
        .ok(json!({
            "op": "register_table",
            "requester": manager(&rid),
            "restaurant_id": rid,
            "table_number": "2",
            "capacity": 4,
            "floor": "terrace"
        }))
        .await;
    (rid, small["id"].clone(), large["id"].clone())
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn ping_and_bad_requests() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.call(json!({ "op": "ping" })).await, json!({ "ok": true, "data": "pong" }));

    client.send_raw("{ not json").await;
    let reply = client.recv(Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["code"], "bad_request");

    let reply = client.call(json!({ "op": "drop_everything" })).await;
    assert_eq!(reply["code"], "bad_request");

    // Connection stays usable after errors.
    assert_eq!(client.call(json!({ "op": "ping" })).await["data"], "pong");
}

#[tokio::test]
async fn admin_operations_are_guarded() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;

    let reply = client
        .call(json!({
            "op": "register_restaurant",
            "requester": customer(Ulid::new()),
            "name": "Nope",
            "opening_time": "09:00",
            "closing_time": "22:00"
        }))
        .await;
    assert_eq!(reply["code"], "access_denied");

    let (rid, small, _) = seed(&mut client).await;
    let reply = client
        .call(json!({
            "op": "set_table_active",
            "requester": customer(Ulid::new()),
            "table_id": small,
            "active": false
        }))
        .await;
    assert_eq!(reply["code"], "access_denied");

    let reply = client
        .call(json!({
            "op": "register_table",
            "requester": manager(&rid),
            "restaurant_id": rid,
            "table_number": "1",
            "capacity": 6
        }))
        .await;
    assert_eq!(reply["code"], "already_exists");
}

#[tokio::test]
async fn availability_queries() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let (rid, small, large) = seed(&mut client).await;

    let tables = client
        .ok(json!({
            "op": "available_tables",
            "restaurant_id": rid,
            "date": "2025-06-01",
            "time": "19:00",
            "duration_hours": 2,
            "party_size": 2
        }))
        .await;
    let ids: Vec<_> = tables.as_array().unwrap().iter().map(|t| t["id"].clone()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&small) && ids.contains(&large));

    let floors = client
        .ok(json!({
            "op": "tables_by_floor",
            "restaurant_id": rid,
            "date": "2025-06-01",
            "time": "19:00",
            "duration_hours": 2,
            "party_size": 3
        }))
        .await;
    assert_eq!(floors, json!([{ "floor": "terrace", "tables": [
        { "id": large, "table_number": "2", "capacity": 4, "floor": "terrace" }
    ]}]));

    let durations = client
        .ok(json!({
            "op": "durations",
            "restaurant_id": rid,
            "date": "2025-06-01",
            "time": "20:00",
            "party_size": 2
        }))
        .await;
    assert_eq!(
        durations,
        json!([
            { "duration_hours": 1, "end_time": "21:00", "available_tables": 2 },
            { "duration_hours": 2, "end_time": "22:00", "available_tables": 2 }
        ])
    );

    let slots = client
        .ok(json!({
            "op": "time_slots",
            "restaurant_id": rid,
            "date": "2025-06-01",
            "party_size": 2,
            "duration_hours": 3
        }))
        .await;
    let slots = slots.as_array().unwrap();
    assert_eq!(slots.first().unwrap()["time"], "09:00");
    assert_eq!(slots.last().unwrap()["time"], "19:00");

    let dates = client
        .ok(json!({ "op": "dates", "restaurant_id": rid, "party_size": 2, "horizon_days": 2 }))
        .await;
    assert_eq!(dates, json!([
        { "date": "2025-05-31", "available_slots": 10 },
        { "date": "2025-06-01", "available_slots": 13 }
    ]));

    let reply = client
        .call(json!({
            "op": "available_tables",
            "restaurant_id": Ulid::new(),
            "date": "2025-06-01",
            "time": "19:00",
            "duration_hours": 2,
            "party_size": 2
        }))
        .await;
    assert_eq!(reply["code"], "not_found");
}

#[tokio::test]
async fn reserve_conflict_and_lifecycle() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let (rid, small, large) = seed(&mut client).await;
    let guest = Ulid::new();

    let outcome = client
        .ok(json!({
            "op": "reserve",
            "requester": customer(guest),
            "restaurant_id": rid,
            "party_size": 2,
            "date": "2025-06-01",
            "time": "19:00",
            "duration_hours": 2,
            "table_id": small,
            "special_requests": "window seat"
        }))
        .await;
    assert_eq!(outcome["reservation"]["status"], "pending");
    assert_eq!(outcome["reservation"]["end_time"], "21:00");
    assert!(outcome["selection"].is_null());
    let reservation_id = outcome["reservation"]["id"].clone();

    let clash = client
        .call(json!({
            "op": "reserve",
            "requester": customer(Ulid::new()),
            "restaurant_id": rid,
            "party_size": 2,
            "date": "2025-06-01",
            "time": "20:00",
            "duration_hours": 1,
            "table_id": small
        }))
        .await;
    assert_eq!(clash["ok"], false);
    assert_eq!(clash["code"], "conflict");

    // Smart mode lands on the only free table, via fallback since no advisor runs.
    let smart = client
        .ok(json!({
            "op": "reserve",
            "requester": customer(Ulid::new()),
            "restaurant_id": rid,
            "party_size": 2,
            "date": "2025-06-01",
            "time": "20:00",
            "duration_hours": 1,
            "preferences": { "quiet": true, "view": "sea", "smoking": false }
        }))
        .await;
    assert_eq!(smart["reservation"]["table"]["id"], large);
    assert_eq!(smart["selection"]["method"], "fallback");
    let record = client
        .ok(json!({ "op": "selection_record", "reservation_id": smart["reservation"]["id"] }))
        .await;
    assert_eq!(record["preferences"], json!({ "quiet": "yes", "view": "sea" }));
    assert_eq!(record["attempts"], 1);

    let approved = client
        .ok(json!({ "op": "approve", "requester": manager(&rid), "reservation_id": reservation_id }))
        .await;
    assert_eq!(approved["status"], "confirmed");

    let again = client
        .call(json!({ "op": "approve", "requester": manager(&rid), "reservation_id": reservation_id }))
        .await;
    assert_eq!(again["code"], "invalid_transition");

    let refused = client
        .call(json!({ "op": "cancel", "requester": customer(Ulid::new()), "reservation_id": reservation_id }))
        .await;
    assert_eq!(refused["code"], "access_denied");
    let cancelled = client
        .ok(json!({ "op": "cancel", "requester": manager(&rid), "reservation_id": reservation_id }))
        .await;
    assert_eq!(cancelled["status"], "cancelled");

    let mine = client
        .ok(json!({ "op": "customer_reservations", "customer_id": guest }))
        .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let on_table = client
        .ok(json!({ "op": "table_reservations", "table_id": small, "date": "2025-06-01" }))
        .await;
    assert_eq!(on_table[0]["special_requests"], "window seat");
}

#[tokio::test]
async fn listen_receives_reservation_events() {
    let (addr, _engine) = start_test_server().await;

    let mut listener = Client::connect(addr).await;
    let (rid, small, _) = seed(&mut listener).await;
    let ack = listener.ok(json!({ "op": "listen", "restaurant_id": rid })).await;
    assert_eq!(ack["listening"], rid);

    let mut mutator = Client::connect(addr).await;
    let outcome = mutator
        .ok(json!({
            "op": "reserve",
            "requester": manager(&rid),
            "restaurant_id": rid,
            "party_size": 2,
            "date": "2025-06-01",
            "time": "12:00",
            "duration_hours": 1,
            "table_id": small
        }))
        .await;

    let event = listener.recv(Duration::from_secs(2)).await.expect("notification");
    assert_eq!(event["notify"], rid);
    assert_eq!(event["payload"]["event"], "created");
    assert_eq!(event["payload"]["reservation_id"], outcome["reservation"]["id"]);
    assert_eq!(event["payload"]["status"], "confirmed");

    let removed = listener.ok(json!({ "op": "unlisten", "restaurant_id": rid })).await;
    assert_eq!(removed["removed"], true);
    mutator
        .ok(json!({ "op": "cancel", "requester": manager(&rid), "reservation_id": outcome["reservation"]["id"] }))
        .await;
    assert!(listener.recv(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn listen_unknown_restaurant_is_not_found() {
    let (addr, _engine) = start_test_server().await;
    let mut client = Client::connect(addr).await;
    let reply = client.call(json!({ "op": "listen", "restaurant_id": Ulid::new() })).await;
    assert_eq!(reply["code"], "not_found");
}
