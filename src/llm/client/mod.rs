//! LLM客户端 - 提供统一的模型调用接口
//!
//! 两种调用形态：单次调用（返回文本或结构化JSON）与有界多轮工具调用。
//! 失败按三类处理：瞬态错误指数退避重试；格式错误做一次修复重试（携带上次
//! 错误信息要求模型只返回合法JSON）；认证/配额错误立即上浮、不重试。

use anyhow::Result;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::{config::Config, llm::client::utils::evaluate_befitting_model, llm::tools::ToolSet};

mod providers;
mod react;
mod react_executor;
pub mod types;
pub mod utils;

pub use react::{ReActConfig, ReActResponse};
pub use types::{LlmError, TokenUsage};

use providers::ProviderClient;
use react_executor::ReActExecutor;

/// LLM客户端 - 提供统一的模型调用接口
#[derive(Clone)]
pub struct LLMClient {
    config: Config,
    client: ProviderClient,
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: Config) -> Result<Self> {
        let client = ProviderClient::new(&config.llm)?;
        Ok(Self { client, config })
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<()> {
        println!("🔄 正在检查模型连接...");
        match self
            .prompt_without_tools("System: You are a helpful assistant.", "Hello")
            .await
        {
            Ok(_) => {
                println!("✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                eprintln!("❌ 模型连接失败: {}", e);
                Err(e)
            }
        }
    }

    /// 通用重试逻辑：瞬态错误指数退避重试，致命错误立即上浮
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let llm_config = &self.config.llm;
        let max_retries = llm_config.retry_attempts;
        let mut retries = 0u32;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    let classified = LlmError::classify(&err);
                    if classified.is_fatal() {
                        eprintln!("❌ 模型服务致命错误，终止重试: {}", classified);
                        return Err(err.context("认证/配额错误，工作流级致命"));
                    }

                    retries += 1;
                    eprintln!(
                        "❌ 调用模型服务出错，重试中 (第 {} / {}次尝试): {}",
                        retries, max_retries, err
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }

                    // 指数退避加随机抖动，避免并行分支同步重试
                    let backoff = llm_config.retry_delay_ms.saturating_mul(1 << (retries - 1));
                    let jitter = rand::rng().random_range(0..500);
                    tokio::time::sleep(std::time::Duration::from_millis(backoff + jitter)).await;
                }
            }
        }
    }

    /// 结构化数据提取
    pub async fn extract<T>(&self, system_prompt: &str, user_prompt: &str) -> Result<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        let (befitting_model, fallover_model) =
            evaluate_befitting_model(&self.config.llm, system_prompt, user_prompt);

        self.extract_inner(system_prompt, user_prompt, befitting_model, fallover_model)
            .await
    }

    async fn extract_inner<T>(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        befitting_model: String,
        fallover_model: Option<String>,
    ) -> Result<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        let llm_config = &self.config.llm;

        let extractor =
            self.client
                .create_extractor::<T>(&befitting_model, system_prompt, llm_config);

        self.retry_with_backoff(|| async {
            match extractor.extract(user_prompt).await {
                Ok(r) => Ok(r),
                Err(e) => match fallover_model {
                    Some(ref model) => {
                        eprintln!(
                            "❌ 调用模型服务出错，尝试 {} 次均失败，尝试使用备选模型{}...{}",
                            llm_config.retry_attempts, model, e
                        );
                        // 修复重试：把上次错误带进提示词，要求只返回合法JSON
                        let user_prompt_with_fixer = format!(
                            "{}\n\n**注意事项**此前调用模型时输出不合法，错误信息为“{}”。这一次请规避该错误，只返回符合要求的合法JSON，不要输出任何其他内容。",
                            user_prompt, e
                        );
                        Box::pin(self.extract_inner(
                            system_prompt,
                            &user_prompt_with_fixer,
                            model.clone(),
                            None,
                        ))
                        .await
                    }
                    None => {
                        eprintln!(
                            "❌ 调用模型服务出错，尝试 {} 次均失败...{}",
                            llm_config.retry_attempts, e
                        );
                        Err(e)
                    }
                },
            }
        })
        .await
    }

    /// 带工具的有界多轮对话
    pub async fn prompt_with_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &ToolSet,
        react_config: ReActConfig,
    ) -> Result<ReActResponse> {
        let (befitting_model, _) =
            evaluate_befitting_model(&self.config.llm, system_prompt, user_prompt);
        let agent =
            self.client
                .create_agent(&befitting_model, system_prompt, &self.config.llm, tools);

        self.retry_with_backoff(|| async {
            ReActExecutor::execute(&agent, user_prompt, &react_config).await
        })
        .await
    }

    /// 简化的单轮对话方法（不使用工具）
    pub async fn prompt_without_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        let (befitting_model, _) =
            evaluate_befitting_model(&self.config.llm, system_prompt, user_prompt);
        let agent = self.client.create_agent(
            &befitting_model,
            system_prompt,
            &self.config.llm,
            &ToolSet::default(),
        );

        self.retry_with_backoff(|| async { agent.prompt(user_prompt).await })
            .await
    }
}
