//! End-to-end checks of the manager and scheduler over the real gateway
//! client, with the HTTP layer replaced by a scripted fleet of remotes.

use async_trait::async_trait;
use fleet::{
    Credential, Endpoint, FleetError, HealthStatus, InstanceFilter, InstanceId, NewInstance,
    Storage, TradingMode,
};
use fleet_orchestrator::config::Intervals;
use fleet_orchestrator::lifecycle::InstanceManager;
use fleet_orchestrator::scheduler::Scheduler;
use fleet_orchestrator::store::MemoryStore;
use gateway_client::{GatewayClient, GatewayConfig, HttpReply, HttpRequest, HttpTransport, TransportError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default, Clone)]
struct Remote {
    /// Answers every call with HTTP 503.
    down: bool,
    /// Answers every call with a `"status": "error"` envelope.
    rejecting: bool,
    /// `closeposition` fails and leaves the book as is.
    sticky: bool,
    positions: Vec<Value>,
    analyzer: bool,
    realized: f64,
}

/// A fleet of fake remotes keyed by `host:port`.
#[derive(Default)]
struct FleetTransport {
    remotes: Mutex<HashMap<String, Remote>>,
    log: Mutex<Vec<(String, String, Value)>>,
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn ok(data: Value) -> HttpReply {
    HttpReply::new(200, json!({"status": "success", "data": data}).to_string())
}

impl FleetTransport {
    fn with(self, host: &str, remote: Remote) -> Self {
        self.remotes.lock().unwrap().insert(host.to_string(), remote);
        self
    }

    fn calls(&self, host: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| h == host)
            .map(|(_, op, _)| op.clone())
            .collect()
    }

    fn body_of(&self, host: &str, op: &str) -> Option<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .find(|(h, o, _)| h == host && o == op)
            .map(|(_, _, body)| body.clone())
    }
}

#[async_trait]
impl HttpTransport for FleetTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        let host = host_of(&request.url);
        let op = request
            .url
            .rsplit("/api/v1/")
            .next()
            .unwrap_or_default()
            .to_string();
        self.log
            .lock()
            .unwrap()
            .push((host.clone(), op.clone(), request.body.clone()));

        let mut remotes = self.remotes.lock().unwrap();
        let Some(remote) = remotes.get_mut(&host) else {
            return Err(TransportError::Connect(format!("no route to {}", host)));
        };
        if remote.down {
            return Ok(HttpReply::new(503, "Service Unavailable"));
        }
        if remote.rejecting {
            return Ok(HttpReply::new(
                200,
                json!({"status": "error", "message": "Invalid openalgo apikey"}).to_string(),
            ));
        }

        let reply = match op.as_str() {
            "ping" => ok(json!({"broker": "zerodha", "message": "pong"})),
            "analyzer" => ok(json!({"analyze_mode": remote.analyzer, "mode": "live"})),
            "analyzer/toggle" => {
                remote.analyzer = request.body["mode"].as_bool().unwrap_or(false);
                ok(json!({"analyze_mode": remote.analyzer}))
            }
            "funds" => ok(json!({"availablecash": "1000.00", "m2mrealized": remote.realized.to_string()})),
            "positionbook" => ok(Value::Array(remote.positions.clone())),
            "tradebook" | "orderbook" => ok(json!([])),
            "closeposition" if remote.sticky => HttpReply::new(
                200,
                json!({"status": "error", "message": "square-off rejected by RMS"}).to_string(),
            ),
            "closeposition" => {
                remote.positions.clear();
                HttpReply::new(200, json!({"status": "success", "message": "All positions closed"}).to_string())
            }
            "cancelallorder" => ok(json!({"canceled_orders": [], "failed_cancellations": []})),
            _ => HttpReply::new(404, "not found"),
        };
        Ok(reply)
    }
}

const UP: &str = "10.0.0.1:5000";
const DOWN: &str = "10.0.0.2:5000";
const REJECTING: &str = "10.0.0.3:5000";
const STICKY: &str = "10.0.0.4:5000";

fn open_position() -> Value {
    json!({"symbol": "SBIN", "exchange": "NSE", "product": "MIS", "quantity": "10", "average_price": "600.5", "pnl": "12.5"})
}

struct Harness {
    transport: Arc<FleetTransport>,
    manager: Arc<InstanceManager>,
    scheduler: Arc<Scheduler>,
}

async fn harness(transport: FleetTransport, hosts: &[&str]) -> Harness {
    let transport = Arc::new(transport);
    let config = GatewayConfig {
        request_timeout: Duration::from_millis(200),
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
    };
    let broker = Arc::new(GatewayClient::new(transport.clone(), config));
    let store = Arc::new(MemoryStore::new());
    for (n, host) in hosts.iter().enumerate() {
        let new = NewInstance::new(
            format!("bot-{}", n + 1),
            Endpoint::new(format!("http://{}", host), Credential::new("key-0123456789abcdef")),
        )
        .with_strategy_tag("fleet-it");
        store.insert_instance(new).await.unwrap();
    }
    let manager = Arc::new(InstanceManager::new(broker, store));
    let scheduler = Arc::new(Scheduler::new(manager.clone(), Intervals::default()));
    Harness {
        transport,
        manager,
        scheduler,
    }
}

/// Verification Test: Fan-out isolation
///
/// **Objective**: One remote answers 503 (retried, then given up), another
/// rejects with an error envelope (not retried); the remaining instance is
/// still checked and recorded healthy in the same cycle.
#[tokio::test]
async fn test_health_cycle_isolates_failing_remotes() {
    let transport = FleetTransport::default()
        .with(UP, Remote::default())
        .with(DOWN, Remote { down: true, ..Remote::default() })
        .with(REJECTING, Remote { rejecting: true, ..Remote::default() });
    let h = harness(transport, &[UP, DOWN, REJECTING]).await;

    let result = h.scheduler.poll_health_checks().await;

    assert_eq!((result.attempted, result.succeeded, result.failed), (3, 1, 2));
    let statuses: Vec<HealthStatus> = h
        .manager
        .list(InstanceFilter::All)
        .await
        .unwrap()
        .iter()
        .map(|i| i.health().status)
        .collect();
    assert_eq!(
        statuses,
        vec![HealthStatus::Healthy, HealthStatus::Unhealthy, HealthStatus::Unhealthy]
    );
    // 503 is retried max_retries times; the error envelope is final.
    assert_eq!(h.transport.calls(DOWN), vec!["ping"; 3]);
    assert_eq!(h.transport.calls(REJECTING), vec!["ping"]);
    assert_eq!(h.transport.calls(UP), vec!["ping", "analyzer"]);
}

/// Verification Test: Aggregation Resilience
///
/// **Objective**: The fleet P&L still reports the reachable instance's
/// figures when another instance cannot be reached.
#[tokio::test]
async fn test_aggregate_pnl_survives_unreachable_instance() {
    let transport = FleetTransport::default()
        .with(UP, Remote { realized: 50.0, ..Remote::default() })
        .with(DOWN, Remote { down: true, ..Remote::default() });
    let h = harness(transport, &[UP, DOWN]).await;

    let pnl = h.manager.aggregated_pnl(InstanceFilter::All).await.unwrap();

    assert_eq!(pnl.instances.len(), 2);
    assert_eq!(pnl.failed, 1);
    assert_eq!(pnl.realized, 50.0);
    assert_eq!(pnl.balance, 1000.0);
    let stored = h.manager.instance(InstanceId::new(1)).await.unwrap();
    assert_eq!(stored.pnl().total(), 50.0);
}

/// Verification Test: Safe-Switch over HTTP
///
/// **Objective**: Positions are closed and orders cancelled under the
/// instance's strategy tag before the mode flips; the key rides in the payload.
#[tokio::test]
async fn test_safe_switch_closes_book_before_toggling() {
    let transport = FleetTransport::default().with(
        UP,
        Remote {
            positions: vec![open_position()],
            ..Remote::default()
        },
    );
    let h = harness(transport, &[UP]).await;

    let outcome = h
        .manager
        .toggle_analyzer_mode(InstanceId::new(1), true)
        .await
        .unwrap();

    assert_eq!(outcome.mode, TradingMode::Analyzer);
    assert!(outcome.closure_errors.is_empty());
    assert_eq!(
        h.transport.calls(UP),
        vec!["closeposition", "cancelallorder", "positionbook", "analyzer/toggle"]
    );
    let close = h.transport.body_of(UP, "closeposition").unwrap();
    assert_eq!(close["strategy"], "fleet-it");
    assert_eq!(close["apikey"], "key-0123456789abcdef");
    let stored = h.manager.store().get_instance(InstanceId::new(1)).await.unwrap().unwrap();
    assert_eq!(stored.mode(), TradingMode::Analyzer);
}

#[tokio::test]
async fn test_safe_switch_refuses_when_square_off_fails() {
    let transport = FleetTransport::default().with(
        STICKY,
        Remote {
            sticky: true,
            positions: vec![open_position()],
            ..Remote::default()
        },
    );
    let h = harness(transport, &[STICKY]).await;

    let err = h
        .manager
        .toggle_analyzer_mode(InstanceId::new(1), true)
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::Validation(_)));
    assert!(!h.transport.calls(STICKY).contains(&"analyzer/toggle".to_string()));
    let stored = h.manager.instance(InstanceId::new(1)).await.unwrap();
    assert_eq!(stored.mode(), TradingMode::Live);
}

/// Verification Test: Safe-Switch with an unreadable position book
///
/// **Objective**: The square-off is rejected and the re-fetched book carries
/// a quantity that cannot be read; the switch is refused instead of treating
/// the position as flat.
#[tokio::test]
async fn test_safe_switch_refuses_unreadable_position_book() {
    for row in [
        json!({"symbol": "SBIN", "exchange": "NSE", "quantity": "N/A", "average_price": "600.5"}),
        json!({"symbol": "SBIN", "exchange": "NSE", "qty": 10, "average_price": "600.5"}),
    ] {
        let transport = FleetTransport::default().with(
            STICKY,
            Remote {
                sticky: true,
                positions: vec![row.clone()],
                ..Remote::default()
            },
        );
        let h = harness(transport, &[STICKY]).await;

        let err = h
            .manager
            .toggle_analyzer_mode(InstanceId::new(1), true)
            .await
            .unwrap_err();

        assert!(err.remote().map(|e| !e.is_transient()).unwrap_or(false), "{}", row);
        assert!(!h.transport.calls(STICKY).contains(&"analyzer/toggle".to_string()));
        let stored = h.manager.instance(InstanceId::new(1)).await.unwrap();
        assert_eq!(stored.mode(), TradingMode::Live);
    }
}

#[tokio::test]
async fn test_instance_cycle_over_http() {
    let transport = FleetTransport::default()
        .with(UP, Remote { realized: 75.0, positions: vec![open_position()], ..Remote::default() })
        .with(REJECTING, Remote { rejecting: true, ..Remote::default() });
    let h = harness(transport, &[UP, REJECTING]).await;

    let result = h.scheduler.poll_instances().await;

    assert_eq!((result.attempted, result.succeeded, result.failed), (2, 1, 1));
    let stored = h.manager.instance(InstanceId::new(1)).await.unwrap();
    assert_eq!(stored.pnl().realized(), 75.0);
    assert_eq!(stored.pnl().unrealized(), 12.5);
}
