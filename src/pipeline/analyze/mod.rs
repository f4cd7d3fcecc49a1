//! 子分析扇出扇入
//!
//! 按规划阶段写入的任务规格并行执行子分析。分支之间完全隔离：单个分支
//! 失败或超时产出一条失败结果，绝不拖垮兄弟分支；扇入保证每个规格恰好
//! 对应一条结果。

use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::llm::client::utils::estimate_token_usage;
use crate::llm::client::{ReActConfig, TokenUsage};
use crate::pipeline::agent_ops;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::{SubagentResult, SubagentSpec, SubagentStatus, WorkflowState};
use crate::prompts::StageId;
use crate::utils::extraction_formatter;
use crate::utils::threads::do_parallel_with_limit;

/// 执行分析阶段
pub async fn run(ctx: &PipelineContext, state: WorkflowState) -> Result<WorkflowState> {
    println!(
        "🔄 开始子分析阶段，共{}个任务，并行上限{}...",
        state.subagent_specs.len(),
        ctx.config.workflow.max_parallels
    );

    let system_prompt = agent_ops::resolve_stage_prompt(ctx, &state, StageId::Analyze)?;
    let timeout = Duration::from_secs(ctx.config.workflow.branch_timeout_seconds);

    let results = run_specs(
        &state.subagent_specs,
        ctx.config.workflow.max_parallels,
        timeout,
        |spec| run_branch(ctx, system_prompt, spec),
    )
    .await;

    let mut state = state;
    for result in &results {
        match result.status {
            SubagentStatus::Ok => {
                println!(
                    "   ✅ [{}] 完成，耗时{:.1}秒",
                    result.spec_name, result.duration_secs
                );
            }
            SubagentStatus::Failed => {
                eprintln!(
                    "   ❌ [{}] 失败: {}",
                    result.spec_name,
                    result.error_detail.as_deref().unwrap_or("未知错误")
                );
                state = state.push_warning(
                    "analyze",
                    format!(
                        "子分析 {} 失败: {}",
                        result.spec_name,
                        result.error_detail.as_deref().unwrap_or("未知错误")
                    ),
                );
            }
            SubagentStatus::TimedOut => {
                eprintln!("   ⚠️ [{}] 超时，保留部分结论", result.spec_name);
                state = state.push_warning(
                    "analyze",
                    format!("子分析 {} 超时，报告将基于其部分结论", result.spec_name),
                );
            }
        }
    }

    let completed = results
        .iter()
        .filter(|r| r.status == SubagentStatus::Ok)
        .count();
    println!(
        "✅ 子分析阶段结束: {}/{} 完成",
        completed,
        results.len()
    );

    state.subagent_results = results;
    Ok(state)
}

/// 带超时与隔离地执行一组任务规格
///
/// 与LLM调用解耦以便测试。每个规格恰好产出一条结果，结果顺序与规格顺序
/// 一致；branch_fn返回Err时转为Failed结果，超出时限转为TimedOut结果。
pub async fn run_specs<'a, F, Fut>(
    specs: &'a [SubagentSpec],
    limit: usize,
    timeout: Duration,
    branch_fn: F,
) -> Vec<SubagentResult>
where
    F: Fn(&'a SubagentSpec) -> Fut,
    Fut: Future<Output = Result<BranchOutcome>> + 'a,
{
    let futures: Vec<_> = specs
        .iter()
        .map(|spec| {
            let branch = branch_fn(spec);
            async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(timeout, branch).await;
                let duration_secs = started.elapsed().as_secs_f64();

                match outcome {
                    Ok(Ok(branch)) => SubagentResult {
                        spec_name: spec.name.clone(),
                        status: branch.status,
                        content: branch.content,
                        error_detail: branch.error_detail,
                        token_usage: branch.token_usage,
                        duration_secs,
                    },
                    Ok(Err(e)) => SubagentResult {
                        spec_name: spec.name.clone(),
                        status: SubagentStatus::Failed,
                        content: String::new(),
                        error_detail: Some(e.to_string()),
                        token_usage: TokenUsage::default(),
                        duration_secs,
                    },
                    Err(_) => SubagentResult {
                        spec_name: spec.name.clone(),
                        status: SubagentStatus::TimedOut,
                        content: String::new(),
                        error_detail: Some(format!("超出分支时限{}秒", timeout.as_secs())),
                        token_usage: TokenUsage::default(),
                        duration_secs,
                    },
                }
            }
        })
        .collect();

    do_parallel_with_limit(futures, limit).await
}

/// 单个分支的执行产物
pub struct BranchOutcome {
    pub status: SubagentStatus,
    pub content: String,
    pub error_detail: Option<String>,
    pub token_usage: TokenUsage,
}

/// 执行单个子分析分支
async fn run_branch(
    ctx: &PipelineContext,
    system_prompt: &str,
    spec: &SubagentSpec,
) -> Result<BranchOutcome> {
    let user_prompt = build_branch_prompt(spec);
    let toolset = ctx.tools.toolset_for(&spec.tools_allowed);

    let react_config = ReActConfig {
        max_iterations: ctx.config.workflow.max_tool_rounds,
        return_partial_on_max_depth: true,
        verbose: ctx.config.verbose,
    };

    let response = ctx
        .invoker
        .run_subagent(
            ctx,
            &spec.name,
            system_prompt,
            &user_prompt,
            &toolset,
            react_config,
        )
        .await?;

    let token_usage = estimate_token_usage(&user_prompt, &response.content);

    // 工具轮数耗尽视为超时终态，部分结论保留给综合阶段
    if response.stopped_by_max_depth {
        Ok(BranchOutcome {
            status: SubagentStatus::TimedOut,
            content: response.content,
            error_detail: Some(format!(
                "工具调用轮数达到上限({}轮)",
                response.iterations_used
            )),
            token_usage,
        })
    } else {
        Ok(BranchOutcome {
            status: SubagentStatus::Ok,
            content: response.content,
            error_detail: None,
            token_usage,
        })
    }
}

fn build_branch_prompt(spec: &SubagentSpec) -> String {
    format!(
        "## 分析任务: {}\n\n{}\n\n## 分析材料\n\n{}",
        spec.archetype.display_name(),
        spec.task_description,
        extraction_formatter::format_pack(&spec.content_payload)
    )
}

#[cfg(test)]
mod tests;
