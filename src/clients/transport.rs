/// 视觉补全接口的传输层
///
/// 只负责"把请求发出去、把状态码和响应体拿回来"，不做任何分类判断
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::clients::wire::ChatRequest;
use crate::error::AppResult;

/// 没拿到状态码的传输故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Timeout,
    Connection,
    MalformedBody,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportFault {
    pub kind: FaultKind,
    pub message: String,
}

impl TransportFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// 服务端的原始响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait VisionTransport: Send + Sync {
    async fn post(&self, request: &ChatRequest) -> Result<TransportReply, TransportFault>;
}

/// 基于 reqwest 的 HTTP 传输
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    /// 创建 HTTP 传输，`timeout` 覆盖整个请求（连接 + 读响应）
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

fn fault_from_reqwest(err: reqwest::Error) -> TransportFault {
    let kind = if err.is_timeout() {
        FaultKind::Timeout
    } else if err.is_connect() {
        FaultKind::Connection
    } else if err.is_decode() || err.is_body() {
        FaultKind::MalformedBody
    } else {
        FaultKind::Other
    };
    TransportFault::new(kind, err.to_string())
}

#[async_trait]
impl VisionTransport for HttpTransport {
    async fn post(&self, request: &ChatRequest) -> Result<TransportReply, TransportFault> {
        debug!("POST {} (模型: {})", self.endpoint, request.model);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/image-text-extractor")
            .header("X-Title", "Image Text Extractor")
            .json(request)
            .send()
            .await
            .map_err(fault_from_reqwest)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(fault_from_reqwest)?;

        debug!("响应状态: {}, 响应体长度: {}", status, body.len());

        Ok(TransportReply { status, body })
    }
}
