//! 图片编码
//!
//! 读取图片文件，得到可直接放进请求里的数据（字节 + 媒体类型）。

use base64::{engine::general_purpose, Engine};
use std::path::Path;
use thiserror::Error;

/// 编码失败原因
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("无法读取图片 {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("图片文件为空: {path}")]
    Empty { path: String },
}

/// 已编码的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

impl EncodedAsset {
    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    /// `data:<media>;base64,<data>` 形式的 URL
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }
}

/// 根据扩展名判断 MIME 类型，未知扩展名按 JPEG 处理
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

/// 读取并编码图片
pub async fn encode_asset(path: &Path) -> Result<EncodedAsset, EncodeError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| EncodeError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;

    if bytes.is_empty() {
        return Err(EncodeError::Empty {
            path: path.display().to_string(),
        });
    }

    Ok(EncodedAsset {
        bytes,
        media_type: media_type_for(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("a.png")), "image/png");
        assert_eq!(media_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(media_type_for(Path::new("a.tiff")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("noext")), "image/jpeg");
    }

    #[tokio::test]
    async fn test_encode_asset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q1.png");
        std::fs::write(&path, b"hello").unwrap();

        let asset = encode_asset(&path).await.unwrap();
        assert_eq!(asset.media_type, "image/png");
        assert_eq!(asset.base64(), "aGVsbG8=");
        assert_eq!(asset.data_url(), "data:image/png;base64,aGVsbG8=");
    }

    #[tokio::test]
    async fn test_encode_rejects_missing_and_empty() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.png");
        std::fs::write(&empty, b"").unwrap();

        assert!(matches!(
            encode_asset(&empty).await,
            Err(EncodeError::Empty { .. })
        ));
        assert!(matches!(
            encode_asset(&dir.path().join("missing.png")).await,
            Err(EncodeError::Unreadable { .. })
        ));
    }
}
