/// 按脚本回放响应的传输
///
/// 以（图片内容, 模型）为键排队预设响应，不发任何网络请求。
/// 某个键的队列只剩最后一条时，该响应会被重复返回。
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::clients::transport::{FaultKind, TransportFault, TransportReply, VisionTransport};
use crate::clients::wire::{ChatRequest, ContentPart};

pub type ScriptedReply = Result<TransportReply, TransportFault>;

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<(String, String), VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某张图片（按文件内容识别）和某个模型排队响应
    pub fn script(&self, asset: &str, model: &str, replies: Vec<ScriptedReply>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry((asset.to_string(), model.to_string()))
                .or_default()
                .extend(replies);
        }
    }

    /// 至今收到的所有请求（图片内容, 模型）
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    /// 成功响应
    pub fn ok(text: &str, model: &str, total_tokens: Option<u64>) -> ScriptedReply {
        let mut body = serde_json::json!({
            "choices": [{"message": {"content": text}}],
            "model": model,
        });
        if let Some(tokens) = total_tokens {
            body["usage"] = serde_json::json!({ "total_tokens": tokens });
        }
        Ok(TransportReply {
            status: 200,
            body: body.to_string(),
        })
    }

    /// 指定状态码的错误响应
    pub fn status(code: u16) -> ScriptedReply {
        Ok(TransportReply {
            status: code,
            body: format!("{{\"error\":{{\"code\":{}}}}}", code),
        })
    }

    pub fn timeout() -> ScriptedReply {
        Err(TransportFault::new(FaultKind::Timeout, "operation timed out"))
    }
}

fn asset_of(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|part| match part {
            ContentPart::ImageUrl { image_url } => image_url.url.split_once(',').map(|(_, d)| d),
            ContentPart::Text { .. } => None,
        })
        .and_then(|data| general_purpose::STANDARD.decode(data).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

#[async_trait]
impl VisionTransport for ScriptedTransport {
    async fn post(&self, request: &ChatRequest) -> Result<TransportReply, TransportFault> {
        let key = (asset_of(request), request.model.clone());
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| TransportFault::new(FaultKind::Other, "脚本锁已损坏"))?;

        match scripts.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportFault::new(FaultKind::Other, "脚本为空"))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportFault::new(FaultKind::Other, "脚本为空"))),
            None => Err(TransportFault::new(
                FaultKind::Other,
                format!("没有为 {:?} 准备响应", key),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_repeats_last() {
        let transport = ScriptedTransport::new();
        transport.script(
            "q1",
            "a",
            vec![ScriptedTransport::status(429), ScriptedTransport::ok("x", "a", None)],
        );

        let data = general_purpose::STANDARD.encode("q1");
        let request = ChatRequest::vision("a", "p", format!("data:image/png;base64,{}", data), None, None);

        assert_eq!(transport.post(&request).await.unwrap().status, 429);
        assert_eq!(transport.post(&request).await.unwrap().status, 200);
        assert_eq!(transport.post(&request).await.unwrap().status, 200);
        assert_eq!(transport.call_count(), 3);
        assert_eq!(transport.calls()[0], ("q1".to_string(), "a".to_string()));
    }
}
