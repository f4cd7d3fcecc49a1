//! 工作流编排
//!
//! 串联提取、规划、子分析、综合与撰写五个阶段。每次阶段完成都落盘一份
//! 状态快照；恢复时根据已填充的输出字段推导续跑点，已完成的阶段不会
//! 重复执行。

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::pipeline::context::PipelineContext;
use crate::pipeline::events::WorkflowEvent;
use crate::pipeline::state::{
    pending_phase, InputDocument, PipelinePhase, WorkflowState, WorkflowStatus,
};
use crate::pipeline::{analyze, compose, extract, plan, synthesize};
use crate::storage::CheckpointStore;

/// 创建新会话：分配会话ID并冻结本次运行的提示词版本
///
/// 版本在这里一次性解析并写入状态，之后整个运行周期（包括断点续跑）都
/// 使用冻结的版本，与提示词库的后续演进无关。
pub async fn new_session(
    ctx: &PipelineContext,
    input_documents: Vec<InputDocument>,
) -> Result<WorkflowState> {
    let prompt_versions = ctx.prompts.resolve_all(&ctx.config.prompts)?;
    let state = WorkflowState::new(
        Uuid::new_v4().to_string(),
        ctx.config.get_inquiry_name(),
        input_documents,
        prompt_versions,
    );

    ctx.checkpoints.persist(&state).await?;
    println!(
        "🚀 新建评估会话 {} ({}份文档)",
        state.session_id,
        state.input_documents.len()
    );
    Ok(state)
}

/// 同步执行：创建会话并运行至终态
pub async fn launch(
    ctx: &PipelineContext,
    input_documents: Vec<InputDocument>,
) -> Result<WorkflowState> {
    let state = new_session(ctx, input_documents).await?;
    run_to_completion(ctx, state).await
}

/// 即发即忘：创建会话后台执行，立即返回会话ID
pub async fn start_detached(
    ctx: &PipelineContext,
    input_documents: Vec<InputDocument>,
) -> Result<String> {
    let state = new_session(ctx, input_documents).await?;
    let session_id = state.session_id.clone();

    let ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = run_to_completion(&ctx, state).await {
            eprintln!("❌ 后台工作流执行出错: {}", e);
        }
    });

    Ok(session_id)
}

/// 从检查点恢复会话并继续运行
pub async fn resume(ctx: &PipelineContext, session_id: &str) -> Result<WorkflowState> {
    let mut state = ctx
        .checkpoints
        .load(session_id)
        .await?
        .with_context(|| format!("找不到会话 {} 的检查点", session_id))?;

    if state.status == WorkflowStatus::Failed {
        // 失败的会话允许重试：回到可推进状态，已完成阶段的产物原样保留
        eprintln!("⚠️ 会话 {} 上次以失败告终，从最近检查点重试", session_id);
        state.status = WorkflowStatus::Pending;
        state = state.push_warning("workflow", "从失败状态恢复重试");
    }

    println!(
        "🔄 恢复会话 {}，当前状态 {}",
        session_id, state.status
    );
    run_to_completion(ctx, state).await
}

/// 查询会话的最近快照
pub async fn get_state(
    ctx: &PipelineContext,
    session_id: &str,
) -> Result<Option<WorkflowState>> {
    ctx.checkpoints.load(session_id).await
}

/// 运行至终态，整体受运行时限约束
pub async fn run_to_completion(
    ctx: &PipelineContext,
    state: WorkflowState,
) -> Result<WorkflowState> {
    let session_id = state.session_id.clone();
    let deadline = Duration::from_secs(ctx.config.workflow.run_deadline_seconds);

    match tokio::time::timeout(deadline, drive(ctx, state)).await {
        Ok(result) => result,
        Err(_) => {
            // 超时后状态已被驱动循环消耗，从最近的检查点重建终态
            let state = ctx
                .checkpoints
                .load(&session_id)
                .await?
                .with_context(|| format!("超时后找不到会话 {} 的检查点", session_id))?;
            let state = state
                .push_error(
                    "workflow",
                    format!("超出整体运行时限{}秒", deadline.as_secs()),
                )
                .with_status(WorkflowStatus::Failed);
            persist_and_emit(ctx, &state).await?;
            eprintln!("❌ {}", state.run_summary());
            Ok(state)
        }
    }
}

fn status_for(phase: PipelinePhase) -> WorkflowStatus {
    match phase {
        PipelinePhase::Extract => WorkflowStatus::Extracting,
        PipelinePhase::Plan => WorkflowStatus::Planning,
        PipelinePhase::Analyze => WorkflowStatus::Analyzing,
        PipelinePhase::Synthesize => WorkflowStatus::Synthesizing,
        PipelinePhase::Compose => WorkflowStatus::Writing,
        PipelinePhase::Done => WorkflowStatus::Completed,
    }
}

fn stage_name(phase: PipelinePhase) -> &'static str {
    match phase {
        PipelinePhase::Extract => "extract",
        PipelinePhase::Plan => "plan",
        PipelinePhase::Analyze => "analyze",
        PipelinePhase::Synthesize => "synthesize",
        PipelinePhase::Compose => "compose",
        PipelinePhase::Done => "done",
    }
}

/// 阶段驱动循环
async fn drive(ctx: &PipelineContext, mut state: WorkflowState) -> Result<WorkflowState> {
    loop {
        let phase = pending_phase(&state);
        if phase == PipelinePhase::Done {
            break;
        }

        if state.status != status_for(phase) {
            state = state.with_status(status_for(phase));
        }
        persist_and_emit(ctx, &state).await?;

        let started = Instant::now();
        let outcome = match phase {
            PipelinePhase::Extract => extract::run(ctx, state.clone()).await,
            PipelinePhase::Plan => plan::run(ctx, state.clone()).await,
            PipelinePhase::Analyze => analyze::run(ctx, state.clone()).await,
            PipelinePhase::Synthesize => synthesize::run(ctx, state.clone()).await,
            PipelinePhase::Compose => compose::run(ctx, state.clone()).await,
            PipelinePhase::Done => unreachable!(),
        };

        match outcome {
            Ok(next) => {
                println!(
                    "⏱️ {}阶段耗时{:.1}秒",
                    stage_name(phase),
                    started.elapsed().as_secs_f64()
                );
                state = next;
            }
            Err(e) => {
                eprintln!("❌ {}阶段失败: {}", stage_name(phase), e);
                let failed = state
                    .push_error(stage_name(phase), e.to_string())
                    .with_status(WorkflowStatus::Failed);
                persist_and_emit(ctx, &failed).await?;
                eprintln!("❌ {}", failed.run_summary());
                return Ok(failed);
            }
        }
    }

    if state.status != WorkflowStatus::Completed {
        state = state.with_status(WorkflowStatus::Completed);
    }
    persist_and_emit(ctx, &state).await?;
    println!("🎉 {}", state.run_summary());
    Ok(state)
}

async fn persist_and_emit(ctx: &PipelineContext, state: &WorkflowState) -> Result<()> {
    ctx.checkpoints.persist(state).await?;
    ctx.events.publish(WorkflowEvent::from_state(state));
    Ok(())
}

#[cfg(test)]
mod tests;
