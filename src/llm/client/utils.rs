use crate::{config::LLMConfig, llm::client::types::TokenUsage, utils::token_estimator::TokenEstimator};

use std::sync::LazyLock;

static TOKEN_ESTIMATOR: LazyLock<TokenEstimator> = LazyLock::new(TokenEstimator::new);

/// 按提示词规模选择模型：小任务优先高能效模型并以高质量模型兜底
pub fn evaluate_befitting_model(
    llm_config: &LLMConfig,
    system_prompt: &str,
    user_prompt: &str,
) -> (String, Option<String>) {
    if system_prompt.len() + user_prompt.len() <= 32 * 1024 {
        return (
            llm_config.model_efficient.clone(),
            Some(llm_config.model_powerful.clone()),
        );
    }
    (llm_config.model_powerful.clone(), None)
}

/// 估算token使用情况（基于文本长度）
pub fn estimate_token_usage(input_text: &str, output_text: &str) -> TokenUsage {
    TokenUsage::new(
        TOKEN_ESTIMATOR.estimate_tokens(input_text),
        TOKEN_ESTIMATOR.estimate_tokens(output_text),
    )
}

/// 连续温度值到离散推理档位的映射
///
/// 部分模型族拒绝连续温度参数，只接受离散档位枚举。映射断点在此定义一次、
/// 全局统一使用：[0, 0.35) → low，[0.35, 0.7) → medium，[0.7, 1.0] → high。
/// 调用方始终以连续值表达创造性需求，不感知这一差异。
pub fn effort_tier(temperature: f64) -> &'static str {
    if temperature < 0.35 {
        "low"
    } else if temperature < 0.7 {
        "medium"
    } else {
        "high"
    }
}

/// 判断模型是否要求离散推理档位而非连续温度
pub fn requires_discrete_effort(llm_config: &LLMConfig, model: &str) -> bool {
    llm_config
        .discrete_effort_models
        .iter()
        .any(|m| m == model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effort_tier_breakpoints() {
        assert_eq!(effort_tier(0.0), "low");
        assert_eq!(effort_tier(0.34), "low");
        assert_eq!(effort_tier(0.35), "medium");
        assert_eq!(effort_tier(0.69), "medium");
        assert_eq!(effort_tier(0.7), "high");
        assert_eq!(effort_tier(1.0), "high");
    }

    #[test]
    fn test_befitting_model_prefers_efficient_for_small_prompts() {
        let config = LLMConfig::default();
        let (model, fallover) = evaluate_befitting_model(&config, "sys", "user");
        assert_eq!(model, config.model_efficient);
        assert_eq!(fallover, Some(config.model_powerful.clone()));
    }

    #[test]
    fn test_befitting_model_switches_to_powerful_for_large_prompts() {
        let config = LLMConfig::default();
        let big = "x".repeat(40 * 1024);
        let (model, fallover) = evaluate_befitting_model(&config, "sys", &big);
        assert_eq!(model, config.model_powerful);
        assert!(fallover.is_none());
    }

    #[test]
    fn test_requires_discrete_effort() {
        let config = LLMConfig {
            discrete_effort_models: vec!["o4-mini".to_string()],
            ..Default::default()
        };
        assert!(requires_discrete_effort(&config, "o4-mini"));
        assert!(!requires_discrete_effort(&config, "gpt-4o"));
    }
}
