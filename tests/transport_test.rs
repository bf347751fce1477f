//! Integration tests for payload delivery over HTTP

#[cfg(feature = "http")]
mod transport_tests {
    use axum::{extract::State, routing::post, Json, Router};
    use page_telemetry::core::{BufferLimits, PageInfo, PerformanceMetrics, UserBehavior};
    use page_telemetry::transport::{
        BeaconDispatcher, BeaconSender, KeepAliveSink, TelemetrySink, Transport,
    };
    use page_telemetry::TelemetryPayload;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn collect(State(received): State<Received>, Json(body): Json<serde_json::Value>) {
        received.lock().unwrap().push(body);
    }

    /// Start a local ingest endpoint on a random port.
    async fn start_ingest() -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/analytics/collect", post(collect))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/api/analytics/collect"), received)
    }

    async fn wait_for(received: &Received, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..100 {
            {
                let bodies = received.lock().unwrap();
                if bodies.len() >= count {
                    return bodies.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        received.lock().unwrap().clone()
    }

    fn payload(session_id: &str) -> TelemetryPayload {
        let limits = BufferLimits::default();
        TelemetryPayload {
            session_id: session_id.to_string(),
            user_id: None,
            fingerprint: None,
            behavior: UserBehavior::new(&limits),
            performance: PerformanceMetrics::empty(&limits),
            network: None,
            errors: vec![],
            timestamp: "2024-01-22T10:00:00.000Z".to_string(),
            page: PageInfo {
                url: "https://app.example/".to_string(),
                title: "Home".to_string(),
                referrer: None,
            },
            consent_version: Some("1".to_string()),
            events_count: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keepalive_delivery() {
        let (endpoint, received) = start_ingest().await;

        let transport = Transport::new(
            endpoint,
            None,
            Arc::new(KeepAliveSink::new().expect("Failed to build client")),
        );
        transport.send(&payload("sess_keepalive"));

        let bodies = wait_for(&received, 1).await;
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["session_id"], "sess_keepalive");
        assert_eq!(bodies[0]["consent_version"], "1");
        assert!(bodies[0]["behavior"]["mouseMovements"].is_array());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_beacon_delivery() {
        let (endpoint, received) = start_ingest().await;

        let beacon = Arc::new(BeaconDispatcher::new(8).expect("Failed to start beacon"));
        let transport = Transport::new(
            endpoint,
            Some(beacon.clone() as Arc<dyn BeaconSender>),
            Arc::new(KeepAliveSink::new().expect("Failed to build client")),
        );
        transport.send(&payload("sess_beacon_1"));
        transport.send(&payload("sess_beacon_2"));

        let bodies = wait_for(&received, 2).await;
        let mut ids: Vec<&str> = bodies
            .iter()
            .filter_map(|b| b["session_id"].as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["sess_beacon_1", "sess_beacon_2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_endpoint_is_silent() {
        // Nothing listens on port 9 locally; delivery must not panic or block.
        let transport = Transport::new(
            "http://127.0.0.1:9/collect",
            None,
            Arc::new(KeepAliveSink::new().expect("Failed to build client")),
        );
        transport.send(&payload("sess_lost"));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
