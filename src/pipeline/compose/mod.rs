//! 报告撰写阶段
//!
//! 基于综合结论（或降级路径下的原始分析结论）撰写最终可行性报告。报告
//! 语言由配置的目标语言决定；分析结论间的冲突并列呈现，不做仲裁。

use anyhow::{Context, Result};

use crate::pipeline::agent_ops;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::{SubagentStatus, WorkflowState};
use crate::prompts::StageId;

/// 执行报告撰写阶段
pub async fn run(ctx: &PipelineContext, state: WorkflowState) -> Result<WorkflowState> {
    println!("🔄 开始撰写可行性报告...");

    let system_prompt = agent_ops::resolve_stage_prompt(ctx, &state, StageId::Compose)?;
    let user_prompt = build_compose_prompt(&state, ctx);

    let report = ctx
        .invoker
        .compose(ctx, system_prompt, &user_prompt)
        .await
        .context("报告撰写失败")?;

    if report.trim().is_empty() {
        anyhow::bail!("报告撰写返回了空内容");
    }

    println!("✅ 报告撰写完成，共{}字符", report.chars().count());
    let mut state = state;
    state.final_report = Some(report);
    Ok(state)
}

/// 构造撰写提示词
///
/// 有综合结论时以综合结论为主干；综合被跳过时把各子分析的原始结论全部
/// 交给撰写器。两条路径都附上告警与未完成领域清单，报告必须如实呈现。
fn build_compose_prompt(state: &WorkflowState, ctx: &PipelineContext) -> String {
    let mut prompt = format!(
        "询单: {}\n\n{}\n\n",
        state.inquiry_name,
        ctx.config.target_language.prompt_instruction()
    );

    match &state.synthesis {
        Some(synthesis) => {
            prompt.push_str("## 综合结论\n\n");
            prompt.push_str(&format!(
                "可行性分级: {}\n\n{}\n\n",
                synthesis.feasibility.display_name(),
                synthesis.risk_narrative
            ));
            if !synthesis.key_risks.is_empty() {
                prompt.push_str("关键风险:\n");
                for risk in &synthesis.key_risks {
                    prompt.push_str(&format!("- {}\n", risk));
                }
                prompt.push('\n');
            }
            if !synthesis.coverage_gaps.is_empty() {
                prompt.push_str("覆盖缺口（必须在报告中注明）:\n");
                for gap in &synthesis.coverage_gaps {
                    prompt.push_str(&format!("- {}\n", gap));
                }
                prompt.push('\n');
            }
        }
        None => {
            // 降级路径：没有综合结论，原始结论直接交给撰写器
            prompt.push_str(
                "## 原始分析结论\n\n注意: 风险综合步骤未完成，以下为各分析领域的原始结论，报告需注明该情况。\n\n",
            );
            for result in &state.subagent_results {
                match result.status {
                    SubagentStatus::Ok => {
                        prompt.push_str(&format!(
                            "### {}\n\n{}\n\n",
                            result.spec_name, result.content
                        ));
                    }
                    SubagentStatus::TimedOut if !result.content.trim().is_empty() => {
                        prompt.push_str(&format!(
                            "### {}（部分结论，分析被中断）\n\n{}\n\n",
                            result.spec_name, result.content
                        ));
                    }
                    _ => {
                        prompt.push_str(&format!(
                            "### {}（未完成: {}）\n\n",
                            result.spec_name,
                            result.error_detail.as_deref().unwrap_or("无错误详情")
                        ));
                    }
                }
            }
        }
    }

    if !state.warnings.is_empty() {
        prompt.push_str("## 过程告警\n\n");
        for warning in &state.warnings {
            prompt.push_str(&format!("- [{}] {}\n", warning.stage, warning.message));
        }
        prompt.push('\n');
    }

    if let Some(pack) = &state.extraction {
        if !pack.extraction_notes.is_empty() {
            prompt.push_str("## 提取备注\n\n");
            for note in &pack.extraction_notes {
                prompt.push_str(&format!("- {}\n", note));
            }
        }
    }

    prompt
}
