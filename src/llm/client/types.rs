use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Token使用情况
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    /// 累加另一次调用的用量
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// 调用模型服务的失败分类
///
/// 分类决定重试策略：瞬态错误走指数退避重试；格式错误走一次修复重试；
/// 认证/配额错误立即上浮并终止整个工作流。
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// 瞬态错误（限流、超时、网络抖动），可重试
    #[error("模型服务瞬态错误: {0}")]
    Transient(String),

    /// 模型输出格式不符合要求（要求JSON时返回了不可解析内容）
    #[error("模型输出格式错误: {0}")]
    Malformed(String),

    /// 认证失败或配额耗尽，不可重试，工作流级致命
    #[error("模型服务认证/配额错误: {0}")]
    Fatal(String),
}

impl LlmError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, LlmError::Fatal(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, LlmError::Malformed(_))
    }

    /// 按错误文本对底层SDK错误做启发式分类
    pub fn classify(err: &anyhow::Error) -> LlmError {
        let text = format!("{:#}", err).to_lowercase();

        if text.contains("401")
            || text.contains("403")
            || text.contains("unauthorized")
            || text.contains("invalid api key")
            || text.contains("insufficient_quota")
            || text.contains("quota")
            || text.contains("billing")
        {
            return LlmError::Fatal(text);
        }

        if text.contains("deserial")
            || text.contains("json")
            || text.contains("parse")
            || text.contains("schema")
        {
            return LlmError::Malformed(text);
        }

        // 限流、超时与其他网络类错误统一按瞬态处理
        LlmError::Transient(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_token_usage_accumulation() {
        let mut usage = TokenUsage::new(100, 20);
        usage.add(&TokenUsage::new(30, 5));
        assert_eq!(usage.input_tokens, 130);
        assert_eq!(usage.output_tokens, 25);
        assert_eq!(usage.total(), 155);
    }

    #[test]
    fn test_classify_fatal() {
        let err = anyhow!("HTTP 401 Unauthorized: invalid api key");
        assert!(LlmError::classify(&err).is_fatal());

        let err = anyhow!("insufficient_quota: plan exceeded");
        assert!(LlmError::classify(&err).is_fatal());
    }

    #[test]
    fn test_classify_malformed() {
        let err = anyhow!("failed to deserialize response into target schema");
        assert!(LlmError::classify(&err).is_malformed());
    }

    #[test]
    fn test_classify_transient() {
        let err = anyhow!("HTTP 429 Too Many Requests");
        let classified = LlmError::classify(&err);
        assert!(!classified.is_fatal());
        assert!(!classified.is_malformed());
    }
}
