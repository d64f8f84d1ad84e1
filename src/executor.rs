//! Shared request executor: weighted endpoint selection plus a single
//! templated HTTP round-trip.
//!
//! The executor is immutable after construction and shared by every worker
//! and request task; the reqwest client inside it pools connections across
//! all of them.

use std::str::FromStr;
use std::time::SystemTime;

use rand::Rng;
use reqwest::Method;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Endpoint;
use crate::metrics::RequestResult;
use crate::template::Generator;

pub struct Executor {
    endpoints: Vec<Endpoint>,
    cum_weights: Vec<u32>,
    total_weight: u32,
    generator: Generator,
    client: reqwest::Client,
}

impl Executor {
    /// Precomputes the cumulative weight table. Non-positive weights are
    /// rewritten to 1 here so a `weight: 0` endpoint still receives traffic.
    pub fn new(endpoints: Vec<Endpoint>, generator: Generator, client: reqwest::Client) -> Self {
        let mut cum_weights = Vec::with_capacity(endpoints.len());
        let mut total_weight = 0u32;
        for endpoint in &endpoints {
            total_weight += endpoint.weight.max(1);
            cum_weights.push(total_weight);
        }
        Self {
            endpoints,
            cum_weights,
            total_weight,
            generator,
            client,
        }
    }

    /// Weighted random selection: draw in `[0, total)` and binary-search the
    /// first cumulative weight above the draw.
    pub fn select_endpoint(&self) -> &Endpoint {
        if self.endpoints.len() == 1 {
            return &self.endpoints[0];
        }
        let draw = rand::rng().random_range(0..self.total_weight);
        let idx = self.cum_weights.partition_point(|&c| c <= draw);
        &self.endpoints[idx.min(self.endpoints.len() - 1)]
    }

    /// Performs one HTTP request. Never fails: every outcome, including
    /// cancellation mid-flight, is folded into the returned [`RequestResult`].
    ///
    /// `duration` covers send through response headers; the body drain that
    /// produces `bytes` is deliberately untimed so response size does not
    /// masquerade as application latency.
    pub async fn execute(&self, cancel: &CancellationToken, endpoint: &Endpoint) -> RequestResult {
        let timestamp = SystemTime::now();
        let url = self.generator.generate(&endpoint.url);

        let method = match Method::from_str(&endpoint.method.to_uppercase()) {
            Ok(method) => method,
            Err(_) => {
                return RequestResult {
                    endpoint: endpoint.name.clone(),
                    status: 0,
                    duration: std::time::Duration::ZERO,
                    bytes: 0,
                    error: Some(format!("invalid method {:?}", endpoint.method)),
                    timestamp,
                    success: false,
                };
            }
        };

        let mut request = self.client.request(method, url);
        for (key, value) in &endpoint.headers {
            request = request.header(key, self.generator.generate(value));
        }
        if !endpoint.body.is_empty() {
            request = request.body(self.generator.generate(&endpoint.body));
        }

        let start = Instant::now();
        let response = tokio::select! {
            _ = cancel.cancelled() => None,
            sent = request.send() => Some(sent),
        };
        let duration = start.elapsed();

        let mut result = RequestResult {
            endpoint: endpoint.name.clone(),
            status: 0,
            duration,
            bytes: 0,
            error: None,
            timestamp,
            success: false,
        };

        let response = match response {
            None => {
                result.error = Some("request cancelled".to_string());
                return result;
            }
            Some(Err(err)) => {
                result.error = Some(err.to_string());
                return result;
            }
            Some(Ok(response)) => response,
        };

        result.status = response.status().as_u16();
        // Drain the body for the byte count; drain failures only cost us the
        // count.
        result.bytes = response
            .bytes()
            .await
            .map(|b| b.len() as u64)
            .unwrap_or_default();

        if endpoint.expect.status != 0 && result.status != endpoint.expect.status {
            result.error = Some(format!(
                "expected status {}, got {}",
                endpoint.expect.status, result.status
            ));
        } else {
            result.success = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Expect;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        addr
    }

    fn endpoint(name: &str, url: String) -> Endpoint {
        Endpoint {
            name: name.to_string(),
            method: "GET".to_string(),
            url,
            headers: HashMap::new(),
            body: String::new(),
            weight: 1,
            expect: Expect { status: 200 },
        }
    }

    fn executor(endpoints: Vec<Endpoint>) -> Executor {
        Executor::new(
            endpoints,
            Generator::new(HashMap::new()),
            reqwest::Client::new(),
        )
    }

    #[test]
    fn single_endpoint_always_selected() {
        let exec = executor(vec![endpoint("only", "http://x".into())]);
        for _ in 0..10 {
            assert_eq!(exec.select_endpoint().name, "only");
        }
    }

    #[test]
    fn selection_follows_weights() {
        let mut light = endpoint("light", "http://x".into());
        light.weight = 1;
        let mut heavy = endpoint("heavy", "http://x".into());
        heavy.weight = 3;
        let exec = executor(vec![light, heavy]);

        let mut heavy_hits = 0u32;
        for _ in 0..1000 {
            if exec.select_endpoint().name == "heavy" {
                heavy_hits += 1;
            }
        }
        // Expected share 75%, with the spec's 10-15% tolerance band.
        assert!(
            (600..=900).contains(&heavy_hits),
            "heavy selected {heavy_hits}/1000"
        );
    }

    #[test]
    fn zero_weight_is_normalized_to_one() {
        let mut zero = endpoint("zero", "http://x".into());
        zero.weight = 0;
        let one = endpoint("one", "http://x".into());
        let exec = executor(vec![zero, one]);

        let mut zero_hits = 0u32;
        for _ in 0..1000 {
            if exec.select_endpoint().name == "zero" {
                zero_hits += 1;
            }
        }
        // Both run at effective weight 1: ~equal share.
        assert!(
            (350..=650).contains(&zero_hits),
            "zero-weight endpoint selected {zero_hits}/1000"
        );
    }

    #[tokio::test]
    async fn execute_success() {
        let addr = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let exec = executor(vec![endpoint("health", format!("http://{addr}/health"))]);
        let cancel = CancellationToken::new();

        let result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.status, 200);
        assert_eq!(result.bytes, 2);
        assert!(result.error.is_none());
        assert!(result.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn execute_status_mismatch() {
        let addr = serve(Router::new().route(
            "/fail",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let exec = executor(vec![endpoint("fail", format!("http://{addr}/fail"))]);
        let cancel = CancellationToken::new();

        let result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(!result.success);
        assert_eq!(result.status, 500);
        let err = result.error.expect("mismatch error");
        assert!(err.contains("expected status 200, got 500"), "{err}");
    }

    #[tokio::test]
    async fn expect_zero_accepts_any_status() {
        let addr = serve(Router::new().route(
            "/teapot",
            get(|| async { StatusCode::IM_A_TEAPOT }),
        ))
        .await;
        let mut ep = endpoint("teapot", format!("http://{addr}/teapot"));
        ep.expect = Expect { status: 0 };
        let exec = executor(vec![ep]);
        let cancel = CancellationToken::new();

        let result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(result.success);
        assert_eq!(result.status, 418);
    }

    #[tokio::test]
    async fn execute_transport_error() {
        // Nothing listens here.
        let exec = executor(vec![endpoint("down", "http://127.0.0.1:1/".into())]);
        let cancel = CancellationToken::new();

        let result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(!result.success);
        assert_eq!(result.status, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn execute_cancelled_mid_flight() {
        let addr = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let exec = executor(vec![endpoint("slow", format!("http://{addr}/slow"))]);
        let cancel = CancellationToken::new();

        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop.cancel();
        });

        let result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(!result.success);
        assert_eq!(result.status, 0);
        assert!(result.error.is_some());
        assert!(result.duration < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn templates_resolve_in_url_and_body() {
        let addr = serve(
            Router::new()
                .route(
                    "/users/{id}",
                    get(|Path(_id): Path<u32>| async { "ok" }),
                )
                .route(
                    "/orders",
                    post(|body: String| async move {
                        if body.contains("${") {
                            StatusCode::BAD_REQUEST
                        } else {
                            StatusCode::OK
                        }
                    }),
                ),
        )
        .await;

        let mut by_url = endpoint(
            "user",
            format!("http://{addr}/users/${{random.int(100, 999)}}"),
        );
        by_url.headers.insert(
            "x-request-id".to_string(),
            "${random.uuid}".to_string(),
        );

        let mut by_body = endpoint("order", format!("http://{addr}/orders"));
        by_body.method = "POST".to_string();
        by_body.body = r#"{"id": "${random.uuid}", "qty": ${random.int(1, 9)}}"#.to_string();

        let exec = executor(vec![by_url, by_body]);
        let cancel = CancellationToken::new();

        let url_result = exec.execute(&cancel, &exec.endpoints[0]).await;
        assert!(url_result.success, "error: {:?}", url_result.error);

        let body_result = exec.execute(&cancel, &exec.endpoints[1]).await;
        assert!(body_result.success, "error: {:?}", body_result.error);
    }
}
