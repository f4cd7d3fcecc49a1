use super::*;
use crate::pipeline::state::{ExtractionPack, SubagentArchetype};
use anyhow::bail;

fn spec(name: &str) -> SubagentSpec {
    SubagentSpec {
        name: name.to_string(),
        archetype: SubagentArchetype::Regulatory,
        task_description: "核查法规".to_string(),
        content_payload: ExtractionPack::default(),
        tools_allowed: vec![],
        priority: 5,
    }
}

fn ok_outcome(content: &str) -> BranchOutcome {
    BranchOutcome {
        status: SubagentStatus::Ok,
        content: content.to_string(),
        error_detail: None,
        token_usage: TokenUsage::default(),
    }
}

#[tokio::test]
async fn test_every_spec_gets_exactly_one_result() {
    let specs: Vec<_> = (0..8).map(|i| spec(&format!("分支{}", i))).collect();

    let results = run_specs(&specs, 3, Duration::from_secs(5), |s| {
        let name = s.name.clone();
        async move { Ok(ok_outcome(&format!("{}的结论", name))) }
    })
    .await;

    assert_eq!(results.len(), specs.len());
    for (spec, result) in specs.iter().zip(&results) {
        assert_eq!(result.spec_name, spec.name);
        assert_eq!(result.status, SubagentStatus::Ok);
    }
}

#[tokio::test]
async fn test_branch_failure_is_isolated() {
    let specs = vec![spec("正常"), spec("出错"), spec("也正常")];

    let results = run_specs(&specs, 3, Duration::from_secs(5), |s| {
        let fails = s.name == "出错";
        async move {
            if fails {
                bail!("模拟的分支错误");
            }
            Ok(ok_outcome("结论"))
        }
    })
    .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, SubagentStatus::Ok);
    assert_eq!(results[1].status, SubagentStatus::Failed);
    assert!(results[1].error_detail.as_deref().unwrap().contains("模拟的分支错误"));
    // 兄弟分支不受影响
    assert_eq!(results[2].status, SubagentStatus::Ok);
}

#[tokio::test]
async fn test_slow_branch_times_out_among_siblings() {
    // 8个分支中1个卡死：其余7个正常完成，卡死的产出timed_out结果
    let specs: Vec<_> = (0..8).map(|i| spec(&format!("分支{}", i))).collect();

    let results = run_specs(&specs, 3, Duration::from_millis(200), |s| {
        let hangs = s.name == "分支4";
        async move {
            if hangs {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(ok_outcome("结论"))
        }
    })
    .await;

    assert_eq!(results.len(), 8);
    for result in &results {
        if result.spec_name == "分支4" {
            assert_eq!(result.status, SubagentStatus::TimedOut);
            assert!(result.error_detail.as_deref().unwrap().contains("时限"));
        } else {
            assert_eq!(result.status, SubagentStatus::Ok);
        }
    }
}

#[tokio::test]
async fn test_partial_content_survives_tool_round_exhaustion() {
    let specs = vec![spec("界限分支")];

    let results = run_specs(&specs, 1, Duration::from_secs(5), |_| async {
        Ok(BranchOutcome {
            status: SubagentStatus::TimedOut,
            content: "目前已核查REACH附录XVII...".to_string(),
            error_detail: Some("工具调用轮数达到上限(5轮)".to_string()),
            token_usage: TokenUsage::default(),
        })
    })
    .await;

    assert_eq!(results[0].status, SubagentStatus::TimedOut);
    assert!(results[0].content.contains("REACH"));
}

#[test]
fn test_branch_prompt_contains_task_and_payload() {
    use crate::pipeline::state::{ContentLabel, DocumentExtraction, Page};

    let mut s = spec("regulatory");
    s.content_payload = ExtractionPack {
        documents: vec![DocumentExtraction {
            filename: "sds.pdf".to_string(),
            pages: vec![Page {
                page_number: 1,
                headers: vec![],
                body_text: "含二甲苯25-30%".to_string(),
                tables: vec![],
                key_value_pairs: vec![],
                lists: vec![],
                content_categories: vec![ContentLabel::CompositionData],
            }],
        }],
        extraction_notes: vec![],
    };

    let prompt = build_branch_prompt(&s);
    assert!(prompt.contains("核查法规"));
    assert!(prompt.contains("含二甲苯25-30%"));
    assert!(prompt.contains("sds.pdf"));
}
