//! End-to-end tests against a live gateway bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ratelimit_gateway::config::{GatewayConfig, StoreBackend};
use ratelimit_gateway::gate::FailurePolicy;
use ratelimit_gateway::http::{serve_listener, GatewayState};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestGateway {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestGateway {
    async fn start(config: GatewayConfig) -> Self {
        let state = Arc::new(GatewayState::from_config(&config).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            serve_listener(listener, state, async move {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .no_proxy()
        .build()
        .unwrap()
}

fn memory_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.redis.backend = StoreBackend::Memory;
    config
}

fn unreachable_redis_config(policy: FailurePolicy) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.redis.url = "redis://127.0.0.1:1".to_string();
    config.redis.timeout_ms = 250;
    config.rate_limiting.failure_policy = policy;
    config
}

#[tokio::test]
async fn test_sequential_requests_all_answered() {
    let gateway = TestGateway::start(memory_config()).await;
    let client = http_client();

    let mut statuses = Vec::new();
    for _ in 0..10 {
        let response = client.get(gateway.url("/")).send().await.unwrap();
        statuses.push(response.status().as_u16());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(statuses.iter().all(|s| [200, 429, 500].contains(s)));
    assert_eq!(&statuses[..5], &[200; 5]);
    assert_eq!(&statuses[5..], &[429; 5]);
}

#[tokio::test]
async fn test_admitted_response_carries_quota_headers() {
    let gateway = TestGateway::start(memory_config()).await;

    let response = http_client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    assert_eq!(response.text().await.unwrap().trim(), "Request successful!");
}

#[tokio::test]
async fn test_rejected_response_body() {
    let mut config = memory_config();
    config.rate_limiting.limit = 1;
    let gateway = TestGateway::start(config).await;
    let client = http_client();

    client.get(gateway.url("/")).send().await.unwrap();
    let response = client.get(gateway.url("/")).send().await.unwrap();

    assert_eq!(response.status().as_u16(), 429);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(
        response.text().await.unwrap().trim(),
        "Rate limit exceeded. Try again later."
    );
}

#[tokio::test]
async fn test_unreachable_redis_fail_closed_returns_500() {
    let gateway = TestGateway::start(unreachable_redis_config(FailurePolicy::FailClosed)).await;

    let response = http_client().get(gateway.url("/")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(response.text().await.unwrap().trim(), "Internal Server Error");
}

#[tokio::test]
async fn test_unreachable_redis_fallback_admits_then_limits() {
    let mut config = unreachable_redis_config(FailurePolicy::Fallback);
    config.rate_limiting.fallback_rate = 1;
    config.rate_limiting.fallback_capacity = 2;
    let gateway = TestGateway::start(config).await;
    let client = http_client();

    let first = client.get(gateway.url("/")).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(first.headers()["x-ratelimit-limit"], "1");

    assert_eq!(client.get(gateway.url("/")).send().await.unwrap().status().as_u16(), 200);
    assert_eq!(client.get(gateway.url("/")).send().await.unwrap().status().as_u16(), 429);
}

#[tokio::test]
async fn test_unreachable_redis_fail_open_returns_200() {
    let gateway = TestGateway::start(unreachable_redis_config(FailurePolicy::FailOpen)).await;
    let client = http_client();

    for _ in 0..5 {
        let response = client.get(gateway.url("/")).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }
}

#[tokio::test]
async fn test_health_reports_dependency_state() {
    let gateway = TestGateway::start(unreachable_redis_config(FailurePolicy::FailClosed)).await;
    let client = http_client();

    let health: serde_json::Value = client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["dependency"], "unknown");
    assert_eq!(health["store"], "redis");

    client.get(gateway.url("/")).send().await.unwrap();

    let health: serde_json::Value = client
        .get(gateway.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["dependency"], "unavailable");
    assert_eq!(health["breaker"], "closed");
    assert_eq!(health["failure_policy"], "fail_closed");
    assert_eq!(health["fallback"]["rate"], 5);
    assert_eq!(health["fallback"]["capacity"], 5);
    assert_eq!(health["local_scopes"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let gateway = TestGateway::start(memory_config()).await;
    let client = http_client();

    client.get(gateway.url("/")).send().await.unwrap();
    let body = client
        .get(gateway.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains("rate_limit_requests_total"));
    assert!(body.contains("rate_limit_latency_seconds"));
}
