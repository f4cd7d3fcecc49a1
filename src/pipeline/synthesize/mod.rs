//! 风险综合阶段
//!
//! 把各子分析的结论合并成统一的风险叙述与可行性结论。综合是增值步骤而非
//! 必经之路：失败时显式降级跳过，报告阶段改用原始结论，绝不让综合失败
//! 毁掉已经完成的分析成果。

use anyhow::Result;

use crate::pipeline::agent_ops;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::{SubagentResult, SubagentStatus, Synthesis, WorkflowState};
use crate::prompts::StageId;

/// 执行风险综合阶段
pub async fn run(ctx: &PipelineContext, state: WorkflowState) -> Result<WorkflowState> {
    println!("🔄 开始风险综合阶段...");

    let system_prompt = agent_ops::resolve_stage_prompt(ctx, &state, StageId::Synthesize)?;
    let user_prompt = build_synthesis_prompt(&state);

    let mut state = state;
    match ctx.invoker.synthesize(ctx, system_prompt, &user_prompt).await {
        Ok(mut synthesis) => {
            ensure_coverage_gaps(&mut synthesis, &state.subagent_results);
            println!(
                "✅ 风险综合完成: {}，{}项关键风险，{}个覆盖缺口",
                synthesis.feasibility.display_name(),
                synthesis.key_risks.len(),
                synthesis.coverage_gaps.len()
            );
            state.synthesis = Some(synthesis);
        }
        Err(e) => {
            // 降级路径：跳过综合，报告阶段改用原始分析结论
            eprintln!("⚠️ 风险综合失败，降级为基于原始结论撰写报告: {}", e);
            state = state.push_warning(
                "synthesize",
                format!("风险综合未完成，报告基于各子分析的原始结论: {}", e),
            );
            state.synthesis_skipped = true;
        }
    }

    Ok(state)
}

/// 构造综合提示词
///
/// 结论不标注来源，综合器按内容本身的权重合并；未完成的分析领域单独列出，
/// 其部分结论照常并入材料。
fn build_synthesis_prompt(state: &WorkflowState) -> String {
    let mut prompt = format!("询单: {}\n\n## 分析结论\n\n", state.inquiry_name);

    let mut section = 1;
    for result in &state.subagent_results {
        if result.content.trim().is_empty() {
            continue;
        }
        match result.status {
            SubagentStatus::Ok => {
                prompt.push_str(&format!("### 结论{}\n\n{}\n\n", section, result.content));
            }
            SubagentStatus::TimedOut => {
                prompt.push_str(&format!(
                    "### 结论{}（分析被中断，以下为部分结论）\n\n{}\n\n",
                    section, result.content
                ));
            }
            SubagentStatus::Failed => continue,
        }
        section += 1;
    }

    let incomplete: Vec<&SubagentResult> = state
        .subagent_results
        .iter()
        .filter(|r| r.status != SubagentStatus::Ok)
        .collect();
    if !incomplete.is_empty() {
        prompt.push_str("## 未完成的分析领域\n\n以下分析领域未能完成，缺失本身必须作为风险因子纳入评估:\n\n");
        for result in incomplete {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                result.spec_name,
                result.status.as_str(),
                result.error_detail.as_deref().unwrap_or("无错误详情")
            ));
        }
    }

    prompt
}

/// 覆盖缺口兜底
///
/// 综合器理应在coverage_gaps里列出所有未完成的领域；漏列时在这里补齐，
/// 保证失败分支不会在报告里无声消失。
fn ensure_coverage_gaps(synthesis: &mut Synthesis, results: &[SubagentResult]) {
    for result in results {
        if result.status == SubagentStatus::Ok {
            continue;
        }
        let mentioned = synthesis
            .coverage_gaps
            .iter()
            .any(|gap| gap.contains(&result.spec_name));
        if !mentioned {
            synthesis.coverage_gaps.push(result.spec_name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::TokenUsage;
    use crate::pipeline::state::FeasibilityClass;
    use std::collections::BTreeMap;

    fn result(name: &str, status: SubagentStatus, content: &str) -> SubagentResult {
        SubagentResult {
            spec_name: name.to_string(),
            status,
            content: content.to_string(),
            error_detail: if status == SubagentStatus::Ok {
                None
            } else {
                Some("模拟错误".to_string())
            },
            token_usage: TokenUsage::default(),
            duration_secs: 1.0,
        }
    }

    fn state_with_results(results: Vec<SubagentResult>) -> WorkflowState {
        let mut state = WorkflowState::new("s-syn", "测试询单", vec![], BTreeMap::new());
        state.subagent_results = results;
        state
    }

    #[test]
    fn test_prompt_omits_attribution_for_ok_branches() {
        let state = state_with_results(vec![
            result("composition", SubagentStatus::Ok, "二甲苯含量超出车间限值"),
            result("regulatory", SubagentStatus::Ok, "需要REACH注册证明"),
        ]);

        let prompt = build_synthesis_prompt(&state);
        assert!(prompt.contains("二甲苯含量超出车间限值"));
        assert!(prompt.contains("### 结论1"));
        assert!(prompt.contains("### 结论2"));
        // 成功结论不标注来源档案名
        assert!(!prompt.contains("### composition"));
    }

    #[test]
    fn test_prompt_lists_incomplete_areas() {
        let state = state_with_results(vec![
            result("toxicity", SubagentStatus::Failed, ""),
            result("regulatory", SubagentStatus::Ok, "合规结论"),
        ]);

        let prompt = build_synthesis_prompt(&state);
        assert!(prompt.contains("未完成的分析领域"));
        assert!(prompt.contains("toxicity (failed)"));
    }

    #[test]
    fn test_prompt_keeps_partial_content_from_timeout() {
        let state = state_with_results(vec![result(
            "regulatory",
            SubagentStatus::TimedOut,
            "已核查REACH附录XVII前半部分",
        )]);

        let prompt = build_synthesis_prompt(&state);
        assert!(prompt.contains("部分结论"));
        assert!(prompt.contains("已核查REACH附录XVII前半部分"));
        assert!(prompt.contains("regulatory (timed_out)"));
    }

    #[test]
    fn test_coverage_gaps_backfilled() {
        let mut synthesis = Synthesis {
            risk_narrative: "叙述".to_string(),
            feasibility: FeasibilityClass::FeasibleWithConditions,
            key_risks: vec![],
            coverage_gaps: vec!["toxicity 领域未完成".to_string()],
        };
        let results = vec![
            result("toxicity", SubagentStatus::Failed, ""),
            result("measurement_quality", SubagentStatus::TimedOut, "部分"),
            result("regulatory", SubagentStatus::Ok, "结论"),
        ];

        ensure_coverage_gaps(&mut synthesis, &results);

        // 已提及的不重复、漏掉的补齐、成功的不出现
        assert_eq!(synthesis.coverage_gaps.len(), 2);
        assert!(synthesis
            .coverage_gaps
            .contains(&"measurement_quality".to_string()));
    }
}
