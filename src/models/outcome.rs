//! 提取结果模型
//!
//! 一次尝试、一个任务的结果都用 `ExtractionOutcome` 表示，
//! 失败原因用 `FailureKind` 区分。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 单次网络尝试的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Success,
    RateLimited,
    UnsupportedOrBadRequest,
    TransientNetwork,
    ServerError,
    Fatal,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Success => "Success",
            Classification::RateLimited => "RateLimited",
            Classification::UnsupportedOrBadRequest => "UnsupportedOrBadRequest",
            Classification::TransientNetwork => "TransientNetwork",
            Classification::ServerError => "ServerError",
            Classification::Fatal => "Fatal",
        };
        f.write_str(name)
    }
}

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// 图片无法读取或为空，不会重试
    EncodingError,
    /// 凭证无效，中止整次运行
    AuthError,
    RateLimited,
    UnsupportedOrBadRequest,
    TransientNetwork,
    ServerError,
    /// 用完所有轮次仍未成功
    Exhausted,
    /// 操作者中止
    Cancelled,
    /// 提取成功但结果文件没能写入
    PersistError,
}

impl FailureKind {
    /// 网络类失败对应的分类；本地失败和终态失败返回 `None`
    pub fn classification(self) -> Option<Classification> {
        match self {
            FailureKind::AuthError => Some(Classification::Fatal),
            FailureKind::RateLimited => Some(Classification::RateLimited),
            FailureKind::UnsupportedOrBadRequest => Some(Classification::UnsupportedOrBadRequest),
            FailureKind::TransientNetwork => Some(Classification::TransientNetwork),
            FailureKind::ServerError => Some(Classification::ServerError),
            FailureKind::EncodingError
            | FailureKind::Exhausted
            | FailureKind::Cancelled
            | FailureKind::PersistError => None,
        }
    }

    /// 由非成功分类得到失败类型
    pub fn from_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::Success => None,
            Classification::RateLimited => Some(FailureKind::RateLimited),
            Classification::UnsupportedOrBadRequest => Some(FailureKind::UnsupportedOrBadRequest),
            Classification::TransientNetwork => Some(FailureKind::TransientNetwork),
            Classification::ServerError => Some(FailureKind::ServerError),
            Classification::Fatal => Some(FailureKind::AuthError),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::EncodingError => "EncodingError",
            FailureKind::AuthError => "AuthError",
            FailureKind::RateLimited => "RateLimited",
            FailureKind::UnsupportedOrBadRequest => "UnsupportedOrBadRequest",
            FailureKind::TransientNetwork => "TransientNetwork",
            FailureKind::ServerError => "ServerError",
            FailureKind::Exhausted => "Exhausted",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::PersistError => "PersistError",
        };
        f.write_str(name)
    }
}

/// token 用量，服务没给的字段保持 `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// 提取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success {
        text: String,
        /// 服务实际使用的模型，可能与请求的不同
        model_used: String,
        usage: Option<TokenUsage>,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ExtractionOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        ExtractionOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExtractionOutcome::Success { .. })
    }

    /// 网络尝试的分类；编码失败等本地结果没有分类
    pub fn classification(&self) -> Option<Classification> {
        match self {
            ExtractionOutcome::Success { .. } => Some(Classification::Success),
            ExtractionOutcome::Failure { kind, .. } => kind.classification(),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExtractionOutcome::Success { .. } => None,
            ExtractionOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// 成功结果的 total_tokens，缺失时为 `None`
    pub fn total_tokens(&self) -> Option<u64> {
        match self {
            ExtractionOutcome::Success { usage, .. } => {
                usage.as_ref().and_then(|u| u.total_tokens)
            }
            ExtractionOutcome::Failure { .. } => None,
        }
    }

    /// 失败信息（成功时为空字符串）
    pub fn message(&self) -> &str {
        match self {
            ExtractionOutcome::Success { .. } => "",
            ExtractionOutcome::Failure { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification_mapping() {
        assert_eq!(
            FailureKind::AuthError.classification(),
            Some(Classification::Fatal)
        );
        assert_eq!(FailureKind::EncodingError.classification(), None);
        assert_eq!(FailureKind::Exhausted.classification(), None);
        assert_eq!(
            FailureKind::from_classification(Classification::Fatal),
            Some(FailureKind::AuthError)
        );
        assert_eq!(FailureKind::from_classification(Classification::Success), None);
    }

    #[test]
    fn test_total_tokens_absent_not_zero() {
        let without_usage = ExtractionOutcome::Success {
            text: "x".into(),
            model_used: "m".into(),
            usage: None,
        };
        assert_eq!(without_usage.total_tokens(), None);

        let partial = ExtractionOutcome::Success {
            text: "x".into(),
            model_used: "m".into(),
            usage: Some(TokenUsage {
                prompt_tokens: Some(10),
                ..Default::default()
            }),
        };
        assert_eq!(partial.total_tokens(), None);

        let failure = ExtractionOutcome::failure(FailureKind::ServerError, "boom");
        assert_eq!(failure.total_tokens(), None);
        assert_eq!(failure.message(), "boom");
        assert_eq!(failure.classification(), Some(Classification::ServerError));
    }
}
