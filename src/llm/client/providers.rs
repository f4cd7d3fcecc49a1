//! LLM Provider支持模块

use anyhow::Result;
use rig::{
    agent::{Agent, AgentBuilderSimple},
    client::CompletionClient,
    completion::{Prompt, PromptError},
    extractor::Extractor,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    config::{LLMConfig, LLMProvider},
    llm::client::utils::{effort_tier, requires_discrete_effort},
    llm::tools::ToolSet,
};

/// 统一的Provider客户端枚举
#[derive(Clone)]
pub enum ProviderClient {
    OpenAI(rig::providers::openai::Client),
    Moonshot(rig::providers::moonshot::Client),
    DeepSeek(rig::providers::deepseek::Client),
    Anthropic(rig::providers::anthropic::Client),
    Ollama(rig::providers::ollama::Client),
}

/// 连续创造性参数到模型实际参数的归一
///
/// 离散档位模型返回Some(tier)，由调用处写入additional_params；
/// 其余模型返回None，直接透传温度。
fn creativity_tier(config: &LLMConfig, model: &str) -> Option<&'static str> {
    requires_discrete_effort(config, model).then(|| effort_tier(config.temperature))
}

impl ProviderClient {
    /// 根据配置创建相应的provider客户端
    pub fn new(config: &LLMConfig) -> Result<Self> {
        match config.provider {
            LLMProvider::OpenAI => {
                let client = rig::providers::openai::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::OpenAI(client))
            }
            LLMProvider::Moonshot => {
                let client = rig::providers::moonshot::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::Moonshot(client))
            }
            LLMProvider::DeepSeek => {
                let client = rig::providers::deepseek::Client::builder(&config.api_key)
                    .base_url(&config.api_base_url)
                    .build();
                Ok(ProviderClient::DeepSeek(client))
            }
            LLMProvider::Anthropic => {
                let client =
                    rig::providers::anthropic::ClientBuilder::new(&config.api_key).build()?;
                Ok(ProviderClient::Anthropic(client))
            }
            LLMProvider::Ollama => {
                let client = rig::providers::ollama::Client::builder().build();
                Ok(ProviderClient::Ollama(client))
            }
        }
    }

    /// 创建Agent，tools为空集时即为无工具的单轮Agent
    pub fn create_agent(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
        tools: &ToolSet,
    ) -> ProviderAgent {
        let tier = creativity_tier(config, model);

        match self {
            ProviderClient::OpenAI(client) => {
                let mut builder =
                    AgentBuilderSimple::new(client.completion_model(model).completions_api())
                        .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into());
                builder = match tier {
                    Some(tier) => builder
                        .additional_params(serde_json::json!({ "reasoning_effort": tier })),
                    None => builder.temperature(config.temperature),
                };
                if let Some(tool) = &tools.catalog {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.knowledge {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.web {
                    builder = builder.tool(tool.clone());
                }
                ProviderAgent::OpenAI(builder.build())
            }
            ProviderClient::Moonshot(client) => {
                let mut builder = AgentBuilderSimple::new(client.completion_model(model))
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into());
                builder = match tier {
                    Some(tier) => builder
                        .additional_params(serde_json::json!({ "reasoning_effort": tier })),
                    None => builder.temperature(config.temperature),
                };
                if let Some(tool) = &tools.catalog {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.knowledge {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.web {
                    builder = builder.tool(tool.clone());
                }
                ProviderAgent::Moonshot(builder.build())
            }
            ProviderClient::DeepSeek(client) => {
                let mut builder = AgentBuilderSimple::new(client.completion_model(model))
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into());
                builder = match tier {
                    Some(tier) => builder
                        .additional_params(serde_json::json!({ "reasoning_effort": tier })),
                    None => builder.temperature(config.temperature),
                };
                if let Some(tool) = &tools.catalog {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.knowledge {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.web {
                    builder = builder.tool(tool.clone());
                }
                ProviderAgent::DeepSeek(builder.build())
            }
            ProviderClient::Anthropic(client) => {
                let mut builder = AgentBuilderSimple::new(client.completion_model(model))
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into());
                builder = match tier {
                    Some(tier) => builder
                        .additional_params(serde_json::json!({ "reasoning_effort": tier })),
                    None => builder.temperature(config.temperature),
                };
                if let Some(tool) = &tools.catalog {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.knowledge {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.web {
                    builder = builder.tool(tool.clone());
                }
                ProviderAgent::Anthropic(builder.build())
            }
            ProviderClient::Ollama(client) => {
                let mut builder = AgentBuilderSimple::new(client.completion_model(model))
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into());
                builder = match tier {
                    Some(tier) => builder
                        .additional_params(serde_json::json!({ "reasoning_effort": tier })),
                    None => builder.temperature(config.temperature),
                };
                if let Some(tool) = &tools.catalog {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.knowledge {
                    builder = builder.tool(tool.clone());
                }
                if let Some(tool) = &tools.web {
                    builder = builder.tool(tool.clone());
                }
                ProviderAgent::Ollama(builder.build())
            }
        }
    }

    /// 创建Extractor
    pub fn create_extractor<T>(
        &self,
        model: &str,
        system_prompt: &str,
        config: &LLMConfig,
    ) -> ProviderExtractor<T>
    where
        T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
    {
        match self {
            ProviderClient::OpenAI(client) => {
                let extractor = client
                    .extractor_completions_api::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .build();
                ProviderExtractor::OpenAI(extractor)
            }
            ProviderClient::Moonshot(client) => {
                let extractor = client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .build();
                ProviderExtractor::Moonshot(extractor)
            }
            ProviderClient::DeepSeek(client) => {
                let extractor = client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .build();
                ProviderExtractor::DeepSeek(extractor)
            }
            ProviderClient::Anthropic(client) => {
                let extractor = client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .build();
                ProviderExtractor::Anthropic(extractor)
            }
            ProviderClient::Ollama(client) => {
                let extractor = client
                    .extractor::<T>(model)
                    .preamble(system_prompt)
                    .max_tokens(config.max_tokens.into())
                    .build();
                ProviderExtractor::Ollama(extractor)
            }
        }
    }
}

/// 统一的Agent枚举
pub enum ProviderAgent {
    OpenAI(Agent<rig::providers::openai::CompletionModel>),
    Moonshot(Agent<rig::providers::moonshot::CompletionModel>),
    DeepSeek(Agent<rig::providers::deepseek::CompletionModel>),
    Anthropic(Agent<rig::providers::anthropic::completion::CompletionModel>),
    Ollama(Agent<rig::providers::ollama::CompletionModel<reqwest::Client>>),
}

impl ProviderAgent {
    /// 执行prompt
    pub async fn prompt(&self, prompt: &str) -> Result<String> {
        match self {
            ProviderAgent::OpenAI(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Moonshot(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::DeepSeek(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Anthropic(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
            ProviderAgent::Ollama(agent) => agent.prompt(prompt).await.map_err(|e| e.into()),
        }
    }

    /// 执行多轮对话（工具调用循环），迭代上限由调用方给定
    pub async fn multi_turn(
        &self,
        prompt: &str,
        max_iterations: usize,
    ) -> Result<String, PromptError> {
        match self {
            ProviderAgent::OpenAI(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
            ProviderAgent::Moonshot(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
            ProviderAgent::DeepSeek(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
            ProviderAgent::Anthropic(agent) => {
                agent.prompt(prompt).multi_turn(max_iterations).await
            }
            ProviderAgent::Ollama(agent) => agent.prompt(prompt).multi_turn(max_iterations).await,
        }
    }
}

/// 统一的Extractor枚举
pub enum ProviderExtractor<T>
where
    T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
{
    OpenAI(Extractor<rig::providers::openai::CompletionModel, T>),
    Moonshot(Extractor<rig::providers::moonshot::CompletionModel, T>),
    DeepSeek(Extractor<rig::providers::deepseek::CompletionModel, T>),
    Anthropic(Extractor<rig::providers::anthropic::completion::CompletionModel, T>),
    Ollama(Extractor<rig::providers::ollama::CompletionModel<reqwest::Client>, T>),
}

impl<T> ProviderExtractor<T>
where
    T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Send + Sync + 'static,
{
    /// 执行提取
    pub async fn extract(&self, prompt: &str) -> Result<T> {
        match self {
            ProviderExtractor::OpenAI(extractor) => {
                extractor.extract(prompt).await.map_err(|e| e.into())
            }
            ProviderExtractor::Moonshot(extractor) => {
                extractor.extract(prompt).await.map_err(|e| e.into())
            }
            ProviderExtractor::DeepSeek(extractor) => {
                extractor.extract(prompt).await.map_err(|e| e.into())
            }
            ProviderExtractor::Anthropic(extractor) => {
                extractor.extract(prompt).await.map_err(|e| e.into())
            }
            ProviderExtractor::Ollama(extractor) => {
                extractor.extract(prompt).await.map_err(|e| e.into())
            }
        }
    }
}
