use crate::error::{AppError, AppResult, FileError};
use crate::models::job::Job;
use crate::models::loaders::natural_order::natural_cmp;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 判断文件扩展名是否在接受列表中（不区分大小写）
pub fn has_accepted_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// 扫描文件夹，按自然顺序返回所有候选任务
///
/// 只看第一层文件，不进入子目录。序号按排序后的位置分配。
pub async fn discover_jobs(folder_path: &Path, extensions: &[String]) -> AppResult<Vec<Job>> {
    if !folder_path.is_dir() {
        return Err(AppError::File(FileError::DirectoryNotFound {
            path: folder_path.display().to_string(),
        }));
    }

    let mut images: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(folder_path)
        .await
        .map_err(|e| AppError::file_read_failed(folder_path.display().to_string(), e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::file_read_failed(folder_path.display().to_string(), e))?
    {
        let path = entry.path();
        if path.is_file() && has_accepted_extension(&path, extensions) {
            images.push(path);
        }
    }

    images.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));

    tracing::debug!("在 {} 中发现 {} 张图片", folder_path.display(), images.len());

    Ok(images
        .into_iter()
        .enumerate()
        .map(|(ordinal, path)| Job::new(path, ordinal))
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_has_accepted_extension() {
        let accepted = exts(&["jpeg", ".png"]);
        assert!(has_accepted_extension(Path::new("a.JPEG"), &accepted));
        assert!(has_accepted_extension(Path::new("a.png"), &accepted));
        assert!(!has_accepted_extension(Path::new("a.gif"), &accepted));
        assert!(!has_accepted_extension(Path::new("noext"), &accepted));
    }

    #[tokio::test]
    async fn test_discover_jobs_natural_order() {
        let dir = tempdir().unwrap();
        for name in ["q10.png", "q2.png", "q1.png", "notes.txt", "q3.PNG"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("q0.png")).unwrap();

        let jobs = discover_jobs(dir.path(), &exts(&["png"])).await.unwrap();
        let ids: Vec<String> = jobs.iter().map(|j| j.id()).collect();
        assert_eq!(ids, vec!["q1.png", "q2.png", "q3.PNG", "q10.png"]);
        let ordinals: Vec<usize> = jobs.iter().map(|j| j.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_discover_missing_folder() {
        let result = tokio_test::block_on(discover_jobs(
            Path::new("/definitely/not/here"),
            &exts(&["png"]),
        ));
        assert!(matches!(
            result,
            Err(AppError::File(FileError::DirectoryNotFound { .. }))
        ));
    }
}
