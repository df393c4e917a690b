//! 补全客户端 - 业务能力层
//!
//! 只负责"拿一张图、一个模型、一段提示词，发一次请求，返回归类后的结果"，
//! 不关心重试、换模型和轮次。
//!
//! ## 结果约定
//! - 图片读不出来或为空：返回 `EncodingError`，不发任何请求
//! - 成功：带上服务实际使用的模型名和 token 用量（缺失字段保持 `None`）
//! - 失败：按状态码 / 传输故障归类

use std::sync::Arc;
use tracing::{debug, warn};

use crate::clients::{ChatRequest, ChatResponse, VisionTransport};
use crate::infrastructure::encoder::{encode_asset, EncodedAsset};
use crate::models::job::Job;
use crate::models::outcome::{Classification, ExtractionOutcome, FailureKind};
use crate::services::retry_policy::classify;
use crate::utils::logging::truncate_text;

/// 补全客户端
pub struct CompletionClient {
    transport: Arc<dyn VisionTransport>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl CompletionClient {
    pub fn new(
        transport: Arc<dyn VisionTransport>,
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            transport,
            temperature,
            max_tokens,
        }
    }

    /// 对一个任务、一个模型发起一次提取
    pub async fn attempt(&self, job: &Job, model: &str, prompt: &str) -> ExtractionOutcome {
        match self.encode(job).await {
            Ok(asset) => self.send(&asset, model, prompt).await,
            Err(failure) => failure,
        }
    }

    /// 读取并编码任务的图片；失败时直接给出 `EncodingError` 结果
    pub async fn encode(&self, job: &Job) -> Result<EncodedAsset, ExtractionOutcome> {
        encode_asset(job.path()).await.map_err(|e| {
            warn!("{} 图片编码失败: {}", job, e);
            ExtractionOutcome::failure(FailureKind::EncodingError, e.to_string())
        })
    }

    /// 发送已编码的图片
    pub async fn send(&self, asset: &EncodedAsset, model: &str, prompt: &str) -> ExtractionOutcome {
        let request = ChatRequest::vision(
            model,
            prompt,
            asset.data_url(),
            self.temperature,
            self.max_tokens,
        );

        let reply = match self.transport.post(&request).await {
            Ok(reply) => reply,
            Err(fault) => {
                let classification = classify(None, Some(fault.kind));
                return failure_for(classification, fault.to_string());
            }
        };

        let classification = classify(Some(reply.status), None);
        if classification != Classification::Success {
            debug!("模型 {} 返回 HTTP {}", model, reply.status);
            return failure_for(
                classification,
                format!("HTTP {}: {}", reply.status, truncate_text(&reply.body, 200)),
            );
        }

        parse_success(&reply.body, model)
    }
}

fn failure_for(classification: Classification, message: String) -> ExtractionOutcome {
    let kind = FailureKind::from_classification(classification).unwrap_or(FailureKind::ServerError);
    ExtractionOutcome::failure(kind, message)
}

/// 解析 2xx 响应；解析失败或没有内容都按服务端错误处理
fn parse_success(body: &str, requested_model: &str) -> ExtractionOutcome {
    let response: ChatResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            return ExtractionOutcome::failure(
                FailureKind::ServerError,
                format!("响应解析失败: {}", e),
            )
        }
    };

    let text = match response.first_content() {
        Some(text) => text.to_string(),
        None => {
            return ExtractionOutcome::failure(FailureKind::ServerError, "响应中没有消息内容")
        }
    };

    ExtractionOutcome::Success {
        text,
        model_used: response
            .model
            .clone()
            .unwrap_or_else(|| requested_model.to_string()),
        usage: response.usage,
    }
}
