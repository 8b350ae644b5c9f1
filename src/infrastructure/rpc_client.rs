//! 节点 RPC 客户端
//!
//! 所有网关共享同一个 `reqwest::Client`（内部连接池），每个远程依赖持有自己的熔断器。
//! 只有传输层失败和 5xx 计入熔断；404 等应用层错误原样返回给调用方。

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::gateway::GatewayError;
use crate::infrastructure::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

const MAX_ERROR_BODY: usize = 256;

/// 构建共享 HTTP 客户端
pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?)
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub struct RpcClient {
    name: String,
    base_url: String,
    http: reqwest::Client,
    headers: Vec<(String, String)>,
    breaker: CircuitBreaker,
}

impl RpcClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        http: reqwest::Client,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), breaker_config),
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            headers: Vec::new(),
        }
    }

    /// 每个请求都附带的请求头（如 TRON-PRO-API-KEY）
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request
    }

    /// 经过熔断器发送请求，返回 (状态码, 响应体)
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), GatewayError> {
        let name = self.name.as_str();
        let outcome = self
            .breaker
            .call(async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| GatewayError::Rpc(format!("{} request failed: {}", name, e)))?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::Rpc(format!("{} read body failed: {}", name, e)))?;
                if status.is_server_error() {
                    return Err(GatewayError::Rpc(format!(
                        "{} returned {}: {}",
                        name,
                        status,
                        truncate(&body)
                    )));
                }
                Ok((status, body))
            })
            .await;

        let (status, body) = outcome.map_err(GatewayError::from)?;

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("{}: {}", self.name, truncate(&body))));
        }
        if !status.is_success() {
            return Err(GatewayError::Rpc(format!(
                "{} returned {}: {}",
                self.name,
                status,
                truncate(&body)
            )));
        }
        Ok((status, body))
    }

    fn parse<T: DeserializeOwned>(&self, body: &str) -> Result<T, GatewayError> {
        serde_json::from_str(body).map_err(|e| {
            GatewayError::Rpc(format!("{} invalid response: {} ({})", self.name, e, truncate(body)))
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let request = self.decorate(self.http.get(self.url(path)));
        let (_, body) = self.send(request).await?;
        self.parse(&body)
    }

    pub async fn get_text(&self, path: &str) -> Result<String, GatewayError> {
        let request = self.decorate(self.http.get(self.url(path)));
        Ok(self.send(request).await?.1)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let request = self.decorate(self.http.post(self.url(path)).json(body));
        let (_, body) = self.send(request).await?;
        self.parse(&body)
    }

    /// 纯文本 POST（Esplora `POST /tx` 提交原始交易 hex）
    pub async fn post_text(&self, path: &str, body: String) -> Result<String, GatewayError> {
        let request = self.decorate(
            self.http
                .post(self.url(path))
                .header("Content-Type", "text/plain")
                .body(body),
        );
        Ok(self.send(request).await?.1)
    }

    /// JSON-RPC 2.0 调用，返回 `result` 字段
    pub async fn json_rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, GatewayError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut response: Value = self.post_json("", &payload).await?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(GatewayError::Rpc(format!("{} {}: {}", self.name, method, message)));
        }

        let result = response
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| {
            GatewayError::Rpc(format!("{} {} invalid result: {}", self.name, method, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{http::StatusCode as AxumStatus, routing::get, routing::post, Json, Router};

    use super::*;
    use crate::infrastructure::circuit_breaker::CircuitState;

    async fn spawn_node() -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { Json(json!({"height": 42})) }))
            .route("/missing", get(|| async { (AxumStatus::NOT_FOUND, "Transaction not found") }))
            .route("/boom", get(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }))
            .route(
                "/rpc",
                post(|Json(body): Json<Value>| async move {
                    match body["method"].as_str() {
                        Some("eth_blockNumber") => Json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x10"})),
                        Some("eth_getTransactionReceipt") => {
                            Json(json!({"jsonrpc": "2.0", "id": 1, "result": null}))
                        }
                        _ => Json(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "method not found"}})),
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client(base: String, failures: u32) -> RpcClient {
        RpcClient::new(
            "test-node",
            base,
            build_http_client(Duration::from_secs(5)).unwrap(),
            CircuitBreakerConfig {
                failure_threshold: failures,
                success_threshold: 1,
                reset_timeout: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_not_found_does_not_trip_breaker() {
        let addr = spawn_node().await;
        let rpc = client(format!("http://{}", addr), 1);

        let value: Value = rpc.get_json("/ok").await.unwrap();
        assert_eq!(value["height"], 42);

        let err = rpc.get_text("missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(rpc.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_server_errors_open_the_circuit() {
        let addr = spawn_node().await;
        let rpc = client(format!("http://{}", addr), 2);

        for _ in 0..2 {
            assert!(matches!(rpc.get_text("boom").await, Err(GatewayError::Rpc(_))));
        }
        assert_eq!(rpc.breaker().state(), CircuitState::Open);
        assert!(matches!(
            rpc.get_text("ok").await,
            Err(GatewayError::CircuitOpen(name)) if name == "test-node"
        ));
    }

    #[tokio::test]
    async fn test_json_rpc_result_and_error() {
        let addr = spawn_node().await;
        let rpc = client(format!("http://{}/rpc", addr), 3);

        let height: String = rpc.json_rpc("eth_blockNumber", json!([])).await.unwrap();
        assert_eq!(height, "0x10");

        let receipt: Option<Value> = rpc
            .json_rpc("eth_getTransactionReceipt", json!(["0xabc"]))
            .await
            .unwrap();
        assert!(receipt.is_none());

        let err = rpc.json_rpc::<Value>("eth_unknown", json!([])).await.unwrap_err();
        assert!(err.to_string().contains("method not found"));
    }
}
