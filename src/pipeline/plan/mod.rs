//! 规划阶段
//!
//! 根据提取结果的类别标注决定触发哪些子分析档案、各自拿到哪部分内容。
//! 触发与内容路由是确定性的规则计算；LLM只做任务书润色，润色失败降级为
//! 默认任务描述，不影响规划结果。

use anyhow::{bail, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::llm::tools::ToolName;
use crate::pipeline::agent_ops;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::{
    ContentLabel, DocumentExtraction, ExtractionPack, SubagentArchetype, SubagentSpec,
    WorkflowState,
};
use crate::prompts::StageId;

/// 档案的触发兴趣标签
fn interests(archetype: SubagentArchetype) -> &'static [ContentLabel] {
    match archetype {
        SubagentArchetype::Composition => &[ContentLabel::CompositionData],
        SubagentArchetype::Toxicity => &[ContentLabel::Toxicity, ContentLabel::CompositionData],
        // 工艺适配与法规是基线档案，对所有内容负责
        SubagentArchetype::ProcessCompatibility => &[
            ContentLabel::ProcessParameters,
            ContentLabel::Properties,
            ContentLabel::CompositionData,
            ContentLabel::Measurements,
        ],
        SubagentArchetype::Regulatory => &[
            ContentLabel::Regulatory,
            ContentLabel::CompositionData,
            ContentLabel::Toxicity,
        ],
        SubagentArchetype::MeasurementQuality => &[ContentLabel::Measurements],
        SubagentArchetype::MaterialProperties => {
            &[ContentLabel::Properties, ContentLabel::Measurements]
        }
    }
}

fn default_tools(archetype: SubagentArchetype) -> Vec<ToolName> {
    match archetype {
        SubagentArchetype::Composition => vec![ToolName::CatalogSearch, ToolName::KnowledgeSearch],
        SubagentArchetype::Toxicity => vec![ToolName::KnowledgeSearch, ToolName::WebSearch],
        SubagentArchetype::ProcessCompatibility => {
            vec![ToolName::CatalogSearch, ToolName::KnowledgeSearch]
        }
        SubagentArchetype::Regulatory => vec![ToolName::KnowledgeSearch, ToolName::WebSearch],
        SubagentArchetype::MeasurementQuality => vec![ToolName::KnowledgeSearch],
        SubagentArchetype::MaterialProperties => {
            vec![ToolName::CatalogSearch, ToolName::KnowledgeSearch]
        }
    }
}

fn default_priority(archetype: SubagentArchetype) -> u8 {
    match archetype {
        SubagentArchetype::Regulatory => 9,
        SubagentArchetype::Toxicity => 8,
        SubagentArchetype::ProcessCompatibility => 8,
        SubagentArchetype::Composition => 7,
        SubagentArchetype::MeasurementQuality => 5,
        SubagentArchetype::MaterialProperties => 4,
    }
}

fn default_task_description(archetype: SubagentArchetype) -> String {
    match archetype {
        SubagentArchetype::Composition => {
            "梳理产品成分与浓度区间，识别VOC及其他挥发性组分，对照在册物料目录评估成分层面的可用性。"
        }
        SubagentArchetype::Toxicity => {
            "评估各组分的毒理学风险与职业暴露限值，指出缺失的毒理数据。"
        }
        SubagentArchetype::ProcessCompatibility => {
            "评估该物料与现有工艺条件（温度、涂布方式、固化流程）的适配性，指出需要工艺调整的环节。"
        }
        SubagentArchetype::Regulatory => {
            "核查各组分在目标市场的法规符合性（REACH、RoHS及行业标准），列出需要的合规文件。"
        }
        SubagentArchetype::MeasurementQuality => {
            "审查测量报告的数据质量：方法、检出限、不确定度与异常值，判断结论可信度。"
        }
        SubagentArchetype::MaterialProperties => {
            "分析理化性能参数（粘度、闪点、密度、固含量等）是否满足应用要求。"
        }
    }
    .to_string()
}

/// 规划LLM的任务书润色输出
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefinedPlan {
    pub tasks: Vec<RefinedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefinedTask {
    /// 档案标识，必须是规划输入中列出的标识之一
    pub archetype: String,
    /// 结合本询单具体内容改写后的任务描述
    pub task_description: String,
}

/// 执行规划阶段
pub async fn run(ctx: &PipelineContext, state: WorkflowState) -> Result<WorkflowState> {
    let pack = state
        .extraction
        .clone()
        .context("规划阶段启动时缺少提取结果")?;

    println!("🔄 开始规划阶段...");

    let fired = fire_archetypes(&pack, ctx.config.workflow.min_subagents);
    println!(
        "   触发{}个分析档案: {}",
        fired.len(),
        fired
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut specs: Vec<SubagentSpec> = fired
        .iter()
        .map(|&archetype| SubagentSpec {
            name: archetype.as_str().to_string(),
            archetype,
            task_description: default_task_description(archetype),
            content_payload: build_payload(&pack, archetype),
            tools_allowed: default_tools(archetype),
            priority: default_priority(archetype),
        })
        .collect();

    // LLM润色是尽力而为的增强，失败只降级不终止
    let mut state = state;
    let refined = refine_tasks(ctx, &state, &specs).await;
    match refined {
        Ok(refined) => {
            let unresolved = apply_refinement(&mut specs, refined);
            for name in unresolved {
                state = state.push_warning(
                    "plan",
                    format!("任务书润色引用了未触发的档案标识 {}，已忽略", name),
                );
            }
        }
        Err(e) => {
            eprintln!("   ⚠️ 任务书润色失败，使用默认任务描述: {}", e);
            state = state.push_warning("plan", format!("任务书润色未完成，使用默认任务描述: {}", e));
        }
    }

    let cap = ctx.config.workflow.max_subagents;
    let (specs, merge_notes) = merge_over_cap(specs, cap);
    for note in merge_notes {
        state = state.push_warning("plan", note);
    }

    if specs.is_empty() {
        bail!("规划阶段没有产出任何子分析任务");
    }

    println!("✅ 规划阶段完成，共{}个子分析任务", specs.len());
    state.subagent_specs = specs;
    Ok(state)
}

/// 确定性的档案触发规则
///
/// 工艺适配与法规是无条件触发的基线；其余档案由类别标注驱动，未检出对应
/// 标签就不触发（省略是规则的正常产物，不是缺陷）。触发数不足下限时补充
/// 理化性能档案兜底。
fn fire_archetypes(pack: &ExtractionPack, min_subagents: usize) -> Vec<SubagentArchetype> {
    let mut fired = vec![
        SubagentArchetype::ProcessCompatibility,
        SubagentArchetype::Regulatory,
    ];

    if pack.has_label(ContentLabel::CompositionData) {
        fired.push(SubagentArchetype::Composition);
        fired.push(SubagentArchetype::Toxicity);
    } else if pack.has_label(ContentLabel::Toxicity) {
        fired.push(SubagentArchetype::Toxicity);
    }
    if pack.has_label(ContentLabel::Measurements) {
        fired.push(SubagentArchetype::MeasurementQuality);
    }
    if pack.has_label(ContentLabel::Properties) {
        fired.push(SubagentArchetype::MaterialProperties);
    }

    if fired.len() < min_subagents && !fired.contains(&SubagentArchetype::MaterialProperties) {
        fired.push(SubagentArchetype::MaterialProperties);
    }

    fired
}

/// 为档案计算内容载荷
///
/// 取标签与兴趣相交的页面；未标注或仅标注为other的页面路由给每个档案，
/// 不确定归属的内容宁可重复分析也不能丢失。
fn build_payload(pack: &ExtractionPack, archetype: SubagentArchetype) -> ExtractionPack {
    let wanted: HashSet<ContentLabel> = interests(archetype).iter().copied().collect();

    let documents: Vec<DocumentExtraction> = pack
        .documents
        .iter()
        .filter_map(|doc| {
            let pages: Vec<_> = doc
                .pages
                .iter()
                .filter(|page| {
                    page.is_unlabeled()
                        || page.labels().contains(&ContentLabel::Other)
                        || page.labels().iter().any(|label| wanted.contains(label))
                })
                .cloned()
                .collect();
            if pages.is_empty() {
                None
            } else {
                Some(DocumentExtraction {
                    filename: doc.filename.clone(),
                    pages,
                })
            }
        })
        .collect();

    ExtractionPack {
        documents,
        extraction_notes: pack.extraction_notes.clone(),
    }
}

async fn refine_tasks(
    ctx: &PipelineContext,
    state: &WorkflowState,
    specs: &[SubagentSpec],
) -> Result<RefinedPlan> {
    let system_prompt = agent_ops::resolve_stage_prompt(ctx, state, StageId::Plan)?;

    let mut user_prompt = format!("询单: {}\n\n已触发的分析档案:\n", state.inquiry_name);
    for spec in specs {
        user_prompt.push_str(&format!(
            "- {} ({}): 默认任务描述: {}；载荷{}页\n",
            spec.name,
            spec.archetype.display_name(),
            spec.task_description,
            spec.content_payload.total_pages()
        ));
    }
    user_prompt.push_str("\n文档内容概览:\n");
    for doc in state.extraction.as_ref().map(|p| &p.documents).into_iter().flatten() {
        user_prompt.push_str(&format!("- {} ({}页)\n", doc.filename, doc.pages.len()));
        for page in &doc.pages {
            let labels: Vec<&str> = page.labels().iter().map(|l| l.as_str()).collect();
            user_prompt.push_str(&format!(
                "  第{}页 [{}]: {}\n",
                page.page_number,
                labels.join(","),
                truncate_chars(&page.body_text, 120)
            ));
        }
    }

    ctx.invoker.refine_plan(ctx, system_prompt, &user_prompt).await
}

/// 把润色后的任务描述套回规格；返回无法按标识匹配的条目
fn apply_refinement(specs: &mut [SubagentSpec], refined: RefinedPlan) -> Vec<String> {
    let mut unresolved = Vec::new();
    for task in refined.tasks {
        match specs.iter_mut().find(|s| s.name == task.archetype) {
            Some(spec) if !task.task_description.trim().is_empty() => {
                spec.task_description = task.task_description;
            }
            Some(_) => {}
            None => unresolved.push(task.archetype),
        }
    }
    unresolved
}

fn payload_page_keys(spec: &SubagentSpec) -> HashSet<(String, u32)> {
    spec.content_payload
        .documents
        .iter()
        .flat_map(|doc| {
            doc.pages
                .iter()
                .map(move |p| (doc.filename.clone(), p.page_number))
        })
        .collect()
}

/// 超出并发任务上限时合并低优先级任务
///
/// 每轮选出优先级之和最低、且载荷有重叠的一对进行合并（无重叠对时退化为
/// 优先级之和最低的一对），直至满足上限。合并保留双方全部载荷与工具授权，
/// 不丢失任何分析面。
fn merge_over_cap(mut specs: Vec<SubagentSpec>, cap: usize) -> (Vec<SubagentSpec>, Vec<String>) {
    let mut notes = Vec::new();
    let cap = cap.max(1);

    while specs.len() > cap {
        let mut best: Option<(usize, usize)> = None;
        let mut best_score = u32::MAX;
        for i in 0..specs.len() {
            for j in (i + 1)..specs.len() {
                let overlaps = !payload_page_keys(&specs[i])
                    .is_disjoint(&payload_page_keys(&specs[j]));
                // 有重叠的对优先于无重叠的对
                let score = specs[i].priority as u32
                    + specs[j].priority as u32
                    + if overlaps { 0 } else { 100 };
                if score < best_score {
                    best_score = score;
                    best = Some((i, j));
                }
            }
        }

        let (i, j) = match best {
            Some(pair) => pair,
            None => break,
        };
        let second = specs.remove(j);
        let first = specs.remove(i);
        notes.push(format!(
            "子分析任务数超过上限{}，已合并 {} 与 {}",
            cap, first.name, second.name
        ));
        specs.push(merge_pair(first, second));
    }

    (specs, notes)
}

fn merge_pair(a: SubagentSpec, b: SubagentSpec) -> SubagentSpec {
    // 档案取优先级较高一方
    let (lead, tail) = if a.priority >= b.priority { (a, b) } else { (b, a) };

    let mut documents = lead.content_payload.documents.clone();
    for doc in &tail.content_payload.documents {
        match documents.iter_mut().find(|d| d.filename == doc.filename) {
            Some(existing) => {
                let known: HashSet<u32> =
                    existing.pages.iter().map(|p| p.page_number).collect();
                for page in &doc.pages {
                    if !known.contains(&page.page_number) {
                        existing.pages.push(page.clone());
                    }
                }
                existing.pages.sort_by_key(|p| p.page_number);
            }
            None => documents.push(doc.clone()),
        }
    }

    let mut tools = lead.tools_allowed.clone();
    for tool in &tail.tools_allowed {
        if !tools.contains(tool) {
            tools.push(*tool);
        }
    }

    SubagentSpec {
        name: format!("{}+{}", lead.name, tail.name),
        archetype: lead.archetype,
        task_description: format!("{}\n\n{}", lead.task_description, tail.task_description),
        content_payload: ExtractionPack {
            documents,
            extraction_notes: lead.content_payload.extraction_notes.clone(),
        },
        tools_allowed: tools,
        priority: lead.priority.max(tail.priority),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
