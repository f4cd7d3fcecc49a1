//! 阶段与LLM交互的公共封装
//!
//! 统一处理提示词版本解析、调用缓存与日志输出，各阶段不直接操作缓存。
//! 各阶段对模型的调用统一经过`ModelInvoker`，生产实现走真实LLM客户端；
//! 测试可以替换为脚本化实现，在不联网的情况下驱动完整流水线。

use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::client::utils::estimate_token_usage;
use crate::llm::client::{ReActConfig, ReActResponse};
use crate::llm::tools::ToolSet;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::plan::RefinedPlan;
use crate::pipeline::state::{Page, Synthesis, WorkflowState};
use crate::prompts::StageId;

/// 各阶段发起模型调用的统一入口
///
/// 方法按阶段划分、签名全部是具体类型，因此可以作为trait对象挂在上下文
/// 里替换。与检查点存储的接入方式一致。
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// 提取阶段：单份文档的结构化页面提取
    async fn extract_pages(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Vec<Page>>;

    /// 规划阶段：任务书润色
    async fn refine_plan(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<RefinedPlan>;

    /// 分析阶段：单个子分析分支的有界多轮工具调用
    async fn run_subagent(
        &self,
        ctx: &PipelineContext,
        log_tag: &str,
        system_prompt: &str,
        user_prompt: &str,
        tools: &ToolSet,
        react_config: ReActConfig,
    ) -> Result<ReActResponse>;

    /// 综合阶段：风险综合
    async fn synthesize(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Synthesis>;

    /// 撰写阶段：最终报告文本
    async fn compose(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String>;
}

/// 提取LLM的结构化输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct ExtractedDocument {
    pages: Vec<Page>,
}

/// 生产实现：转发到真实LLM客户端，结构化调用带缓存
pub struct LiveInvoker;

#[async_trait]
impl ModelInvoker for LiveInvoker {
    async fn extract_pages(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Vec<Page>> {
        let extracted: ExtractedDocument =
            extract_cached(ctx, "extract", system_prompt, user_prompt).await?;
        Ok(extracted.pages)
    }

    async fn refine_plan(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<RefinedPlan> {
        extract_cached(ctx, "plan", system_prompt, user_prompt).await
    }

    async fn run_subagent(
        &self,
        ctx: &PipelineContext,
        log_tag: &str,
        system_prompt: &str,
        user_prompt: &str,
        tools: &ToolSet,
        react_config: ReActConfig,
    ) -> Result<ReActResponse> {
        prompt_with_tools(ctx, log_tag, system_prompt, user_prompt, tools, react_config).await
    }

    async fn synthesize(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Synthesis> {
        extract_cached(ctx, "synthesize", system_prompt, user_prompt).await
    }

    async fn compose(
        &self,
        ctx: &PipelineContext,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String> {
        ctx.llm_client
            .prompt_without_tools(system_prompt, user_prompt)
            .await
    }
}

/// 解析某阶段在本次运行中钉住的系统提示词
///
/// 版本取自启动时冻结在状态里的审计记录，而不是重新读取配置，保证断点
/// 续跑时同一会话的所有调用用同一套提示词。
pub fn resolve_stage_prompt(
    ctx: &PipelineContext,
    state: &WorkflowState,
    stage: StageId,
) -> Result<&'static str> {
    let version = state
        .prompt_versions
        .get(stage.as_str())
        .map(String::as_str)
        .with_context(|| format!("状态中缺少{}阶段的提示词版本记录", stage))?;
    let template = ctx.prompts.resolve(stage, version)?;
    Ok(template.text)
}

/// 带缓存的结构化提取
///
/// 缓存键由系统提示词与用户提示词共同决定，提示词版本变化自然使旧缓存
/// 失效。force_regenerate只跳过读取，结果仍会写回。
pub async fn extract_cached<T>(
    ctx: &PipelineContext,
    category: &str,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T>
where
    T: JsonSchema + for<'a> Deserialize<'a> + Serialize + Clone + Send + Sync + 'static,
{
    let cache_key = format!("{}\n===\n{}", system_prompt, user_prompt);

    if !ctx.config.force_regenerate {
        let cache = ctx.cache_manager.read().await;
        if let Ok(Some(hit)) = cache.get::<T>(category, &cache_key).await {
            println!("   ♻️  [{}] 命中缓存，跳过LLM调用", category);
            return Ok(hit);
        }
    }

    let result: T = ctx.llm_client.extract(system_prompt, user_prompt).await?;

    {
        let output_json = serde_json::to_string(&result).unwrap_or_default();
        let usage = estimate_token_usage(&cache_key, &output_json);
        let cache = ctx.cache_manager.write().await;
        if let Err(e) = cache
            .set_with_tokens(category, &cache_key, result.clone(), usage)
            .await
        {
            eprintln!("⚠️ [{}] 写入缓存失败: {}", category, e);
        }
    }

    Ok(result)
}

/// 带工具的有界多轮调用
///
/// 工具结果随外部状态变化，不做缓存。
pub async fn prompt_with_tools(
    ctx: &PipelineContext,
    log_tag: &str,
    system_prompt: &str,
    user_prompt: &str,
    tools: &ToolSet,
    react_config: ReActConfig,
) -> Result<ReActResponse> {
    println!("   🔄 [{}] 开始分析...", log_tag);
    let response = ctx
        .llm_client
        .prompt_with_tools(system_prompt, user_prompt, tools, react_config)
        .await?;

    if response.stopped_by_max_depth {
        eprintln!(
            "   ⚠️ [{}] 达到最大工具轮数({}轮)，保留部分结论",
            log_tag, response.iterations_used
        );
    } else {
        println!(
            "   ✅ [{}] 分析完成（{}轮）",
            log_tag, response.iterations_used
        );
    }

    Ok(response)
}
