//! 模型候选列表

use crate::error::{AppError, AppResult};

/// 按优先级排列的候选模型，一次运行内不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoster {
    models: Vec<String>,
}

impl ModelRoster {
    /// 创建候选列表：去掉空白项和重复项（保留第一次出现的位置），不能为空
    pub fn new<I, S>(models: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for model in models {
            let model = model.into().trim().to_string();
            if !model.is_empty() && !unique.contains(&model) {
                unique.push(model);
            }
        }

        if unique.is_empty() {
            return Err(AppError::invalid_config("models", "至少需要一个模型"));
        }

        Ok(Self { models: unique })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    /// `index` 之后是否还有候选
    pub fn has_next(&self, index: usize) -> bool {
        index + 1 < self.models.len()
    }
}
