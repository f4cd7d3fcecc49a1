//! 工作流状态模型
//!
//! `WorkflowState`是贯穿所有阶段的唯一状态对象，采用"按替换修改"：每个阶段
//! 接收一个不可变快照、返回一个新快照，绝不就地修改。某阶段写入过的输出
//! 字段，后续阶段只能追加errors/warnings引用它，不得改写。替换式更新让每
//! 次替换天然成为一个可落盘的检查点，也从结构上杜绝并发修改。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::llm::client::TokenUsage;
use crate::llm::tools::ToolName;

/// 工作流状态枚举，除终态failed可从任意非终态进入外单调推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Extracting,
    Planning,
    Analyzing,
    Synthesizing,
    Writing,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Extracting => "extracting",
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::Analyzing => "analyzing",
            WorkflowStatus::Synthesizing => "synthesizing",
            WorkflowStatus::Writing => "writing",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// 推进序，用于校验单调性
    pub fn rank(&self) -> u8 {
        match self {
            WorkflowStatus::Pending => 0,
            WorkflowStatus::Extracting => 1,
            WorkflowStatus::Planning => 2,
            WorkflowStatus::Analyzing => 3,
            WorkflowStatus::Synthesizing => 4,
            WorkflowStatus::Writing => 5,
            WorkflowStatus::Completed => 6,
            WorkflowStatus::Failed => 7,
        }
    }

    /// 合法状态转移：向前推进，或从任意非终态进入failed
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == WorkflowStatus::Failed {
            return true;
        }
        next.rank() > self.rank() && next != WorkflowStatus::Failed
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 内容类别受控词表
///
/// 既用于表格的interpretation_hint，也用于整页的content_categories。
/// 这是尽力而为、可能出错的提示性标签：下游只用它做过滤路由，绝不作为
/// 正确性判据。缺少某类别只说明未检出，不是内容不存在的证据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentLabel {
    CompositionData,
    Measurements,
    Toxicity,
    ProcessParameters,
    Regulatory,
    Properties,
    Other,
}

impl ContentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentLabel::CompositionData => "composition_data",
            ContentLabel::Measurements => "measurements",
            ContentLabel::Toxicity => "toxicity",
            ContentLabel::ProcessParameters => "process_parameters",
            ContentLabel::Regulatory => "regulatory",
            ContentLabel::Properties => "properties",
            ContentLabel::Other => "other",
        }
    }
}

/// 表格块
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableBlock {
    /// 列头
    pub headers: Vec<String>,
    /// 数据行，每行宽度必须与列头数量一致
    pub rows: Vec<Vec<String>>,
    /// 解读提示，仅供路由参考
    pub interpretation_hint: ContentLabel,
}

impl TableBlock {
    /// 是否存在宽度与列头不一致的行
    pub fn is_ragged(&self) -> bool {
        let width = self.headers.len();
        self.rows.iter().any(|row| row.len() != width)
    }
}

/// 键值对片段
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

/// 列表片段
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListFragment {
    pub title: Option<String>,
    pub items: Vec<String>,
}

/// 内容优先的页面提取单元
///
/// 零信息损失契约：所有字段的并集必须能在语义上还原源文本；提取阶段只加
/// 轻量类别标注，绝不丢弃或概括内容。
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Page {
    /// 页码，文档内从1开始连续编号
    pub page_number: u32,
    /// 页面标题行
    pub headers: Vec<String>,
    /// 正文文本，原样保留
    pub body_text: String,
    pub tables: Vec<TableBlock>,
    pub key_value_pairs: Vec<KeyValuePair>,
    pub lists: Vec<ListFragment>,
    /// 整页的话题标签，零个或多个
    pub content_categories: Vec<ContentLabel>,
}

impl Page {
    /// 页面涉及的所有类别标签（整页标签与各表格提示的并集）
    pub fn labels(&self) -> Vec<ContentLabel> {
        let mut labels: Vec<ContentLabel> = self.content_categories.clone();
        for table in &self.tables {
            labels.push(table.interpretation_hint);
        }
        labels.sort_by_key(|l| l.as_str());
        labels.dedup();
        labels
    }

    /// 是否完全未被标注（未检出任何具体类别）
    pub fn is_unlabeled(&self) -> bool {
        self.labels()
            .iter()
            .all(|label| *label == ContentLabel::Other)
    }
}

/// 单个文档的提取结果
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DocumentExtraction {
    pub filename: String,
    pub pages: Vec<Page>,
}

/// 提取阶段的完整产物
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionPack {
    pub documents: Vec<DocumentExtraction>,
    /// 提取过程中的尽力而为备注（如表格行宽修正记录）
    pub extraction_notes: Vec<String>,
}

impl ExtractionPack {
    pub fn total_pages(&self) -> usize {
        self.documents.iter().map(|d| d.pages.len()).sum()
    }

    pub fn total_tables(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|d| &d.pages)
            .map(|p| p.tables.len())
            .sum()
    }

    /// 是否存在标注为指定类别的页面或表格
    pub fn has_label(&self, label: ContentLabel) -> bool {
        self.documents
            .iter()
            .flat_map(|d| &d.pages)
            .any(|p| p.labels().contains(&label))
    }
}

/// 输入文档：外部文档处理服务产出的分页原始文本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDocument {
    pub filename: String,
    /// 按页切分的原始文本
    pub pages: Vec<String>,
}

/// 子分析档案类型，有界且可枚举；实例化（哪些触发、各拿什么内容）由数据决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentArchetype {
    /// 成分与VOC分析
    Composition,
    /// 毒理与职业暴露分析
    Toxicity,
    /// 工艺适配性分析
    ProcessCompatibility,
    /// 法规合规分析
    Regulatory,
    /// 测量数据质量分析
    MeasurementQuality,
    /// 理化性能分析
    MaterialProperties,
}

impl SubagentArchetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubagentArchetype::Composition => "composition",
            SubagentArchetype::Toxicity => "toxicity",
            SubagentArchetype::ProcessCompatibility => "process_compatibility",
            SubagentArchetype::Regulatory => "regulatory",
            SubagentArchetype::MeasurementQuality => "measurement_quality",
            SubagentArchetype::MaterialProperties => "material_properties",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SubagentArchetype::Composition => "成分与VOC分析",
            SubagentArchetype::Toxicity => "毒理与暴露分析",
            SubagentArchetype::ProcessCompatibility => "工艺适配性分析",
            SubagentArchetype::Regulatory => "法规合规分析",
            SubagentArchetype::MeasurementQuality => "测量数据质量分析",
            SubagentArchetype::MaterialProperties => "理化性能分析",
        }
    }
}

/// 子分析任务规格，由Planner一次性写入
///
/// content_payload是Planner计算好的内容子集（所有权归Planner，子分析绝不
/// 重新过滤）；tools_allowed取自固定工具注册表；priority只影响调度与合并
/// 次序，不影响正确性。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSpec {
    pub name: String,
    pub archetype: SubagentArchetype,
    pub task_description: String,
    pub content_payload: ExtractionPack,
    pub tools_allowed: Vec<ToolName>,
    pub priority: u8,
}

/// 子分析分支的终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Ok,
    Failed,
    TimedOut,
}

impl SubagentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubagentStatus::Ok => "ok",
            SubagentStatus::Failed => "failed",
            SubagentStatus::TimedOut => "timed_out",
        }
    }
}

/// 子分析结果
///
/// 失败/超时的结果是一等值而非缺失。综合阶段必须能将"尝试过但失败"与
/// "从未执行"区分开。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    /// 回指任务规格的名称（按名匹配，无需外键约束）
    pub spec_name: String,
    pub status: SubagentStatus,
    /// 结论文本；超时时为已有的部分内容
    pub content: String,
    pub error_detail: Option<String>,
    pub token_usage: TokenUsage,
    pub duration_secs: f64,
}

/// 可行性分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FeasibilityClass {
    Feasible,
    FeasibleWithConditions,
    NotFeasible,
    Inconclusive,
}

impl FeasibilityClass {
    pub fn display_name(&self) -> &'static str {
        match self {
            FeasibilityClass::Feasible => "可行",
            FeasibilityClass::FeasibleWithConditions => "有条件可行",
            FeasibilityClass::NotFeasible => "不可行",
            FeasibilityClass::Inconclusive => "证据不足",
        }
    }
}

/// 风险综合结论
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Synthesis {
    /// 统一的风险叙述
    pub risk_narrative: String,
    pub feasibility: FeasibilityClass,
    /// 按严重程度排列的关键风险点
    pub key_risks: Vec<String>,
    /// 覆盖缺口：未能完成的分析领域，缺失本身就是风险因子
    pub coverage_gaps: Vec<String>,
}

/// 结构化诊断记录，各阶段只追加、从不删除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 贯穿所有阶段的工作流状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// 不透明会话标识，整个运行周期不变
    pub session_id: String,
    pub inquiry_name: String,
    pub status: WorkflowStatus,
    /// 输入文档，启动时一次性写入，之后只读
    pub input_documents: Vec<InputDocument>,
    /// 启动时冻结的 阶段 → 提示词具体版本 审计记录
    pub prompt_versions: BTreeMap<String, String>,
    /// Extractor一次性写入
    pub extraction: Option<ExtractionPack>,
    /// Planner一次性写入
    pub subagent_specs: Vec<SubagentSpec>,
    /// 扇出扇入步骤填充；累积式合并，每个分支独立贡献，顺序无关紧要，
    /// 完整性（每个spec恰好对应一条结果，成功或失败）是不变量
    pub subagent_results: Vec<SubagentResult>,
    /// Risk Synthesizer一次性写入
    pub synthesis: Option<Synthesis>,
    /// 综合阶段降级跳过的显式标记
    pub synthesis_skipped: bool,
    /// Writer一次性写入
    pub final_report: Option<String>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        session_id: impl Into<String>,
        inquiry_name: impl Into<String>,
        input_documents: Vec<InputDocument>,
        prompt_versions: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            inquiry_name: inquiry_name.into(),
            status: WorkflowStatus::Pending,
            input_documents,
            prompt_versions,
            extraction: None,
            subagent_specs: Vec::new(),
            subagent_results: Vec::new(),
            synthesis: None,
            synthesis_skipped: false,
            final_report: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 状态替换：推进status并刷新时间戳
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        debug_assert!(
            self.status.can_transition_to(status) || self.status == status,
            "非法状态转移: {} -> {}",
            self.status,
            status
        );
        self.status = status;
        self.updated_at = Utc::now();
        self
    }

    pub fn push_error(mut self, stage: &str, message: impl Into<String>) -> Self {
        self.errors.push(Diagnostic::new(stage, message));
        self.updated_at = Utc::now();
        self
    }

    pub fn push_warning(mut self, stage: &str, message: impl Into<String>) -> Self {
        self.warnings.push(Diagnostic::new(stage, message));
        self.updated_at = Utc::now();
        self
    }

    /// 未完成的子分析数量
    pub fn incomplete_branches(&self) -> usize {
        self.subagent_results
            .iter()
            .filter(|r| r.status != SubagentStatus::Ok)
            .count()
    }

    /// 终态的人类可读总结
    ///
    /// 必须区分"部分分析未完成"与"整体失败"：5/6个子分析成功的报告与
    /// 空失败是截然不同的结果，绝不能混为一谈。
    pub fn run_summary(&self) -> String {
        match self.status {
            WorkflowStatus::Completed => {
                let total = self.subagent_results.len();
                let incomplete = self.incomplete_branches();
                if incomplete == 0 && !self.synthesis_skipped {
                    format!("评估完成：{}个分析领域全部完成", total)
                } else if incomplete == 0 {
                    format!(
                        "评估完成（降级）：{}个分析领域全部完成，风险综合阶段被跳过，报告基于原始分析结论",
                        total
                    )
                } else {
                    format!(
                        "评估完成（部分）：{}个分析领域中有{}个未能完成，详见报告中的覆盖缺口说明",
                        total, incomplete
                    )
                }
            }
            WorkflowStatus::Failed => {
                let stage = self
                    .errors
                    .last()
                    .map(|e| e.stage.as_str())
                    .unwrap_or("unknown");
                format!(
                    "评估失败：工作流终止于{}阶段，共记录{}条错误",
                    stage,
                    self.errors.len()
                )
            }
            other => format!("评估进行中：当前阶段 {}", other),
        }
    }
}

/// 恢复点推导的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Extract,
    Plan,
    Analyze,
    Synthesize,
    Compose,
    Done,
}

/// 从状态快照推导下一个待执行阶段
///
/// 不信任快照中的status字段（崩溃可能发生在status已推进、阶段未完成时），
/// 而是根据哪些输出字段已填充来判定，保证断点续跑幂等：已完成的阶段绝不
/// 重复执行。
pub fn pending_phase(state: &WorkflowState) -> PipelinePhase {
    if state.extraction.is_none() {
        PipelinePhase::Extract
    } else if state.subagent_specs.is_empty() {
        PipelinePhase::Plan
    } else if state.subagent_results.len() < state.subagent_specs.len() {
        PipelinePhase::Analyze
    } else if state.synthesis.is_none() && !state.synthesis_skipped {
        PipelinePhase::Synthesize
    } else if state.final_report.is_none() {
        PipelinePhase::Compose
    } else {
        PipelinePhase::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page(categories: Vec<ContentLabel>) -> Page {
        Page {
            page_number: 1,
            headers: vec!["安全数据表".to_string()],
            body_text: "第3节 成分/组成信息".to_string(),
            tables: vec![],
            key_value_pairs: vec![],
            lists: vec![],
            content_categories: categories,
        }
    }

    fn empty_state() -> WorkflowState {
        WorkflowState::new("s-1", "测试询单", vec![], BTreeMap::new())
    }

    #[test]
    fn test_status_transitions_monotonic() {
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Extracting));
        assert!(WorkflowStatus::Extracting.can_transition_to(WorkflowStatus::Planning));
        // 不允许回退
        assert!(!WorkflowStatus::Planning.can_transition_to(WorkflowStatus::Extracting));
        // failed可从任意非终态进入
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Failed));
        assert!(WorkflowStatus::Writing.can_transition_to(WorkflowStatus::Failed));
        // 终态不可再转移
        assert!(!WorkflowStatus::Completed.can_transition_to(WorkflowStatus::Failed));
        assert!(!WorkflowStatus::Failed.can_transition_to(WorkflowStatus::Completed));
    }

    #[test]
    fn test_table_raggedness() {
        let table = TableBlock {
            headers: vec!["物质".to_string(), "含量".to_string()],
            rows: vec![
                vec!["甲苯".to_string(), "12%".to_string()],
                vec!["".to_string()],
            ],
            interpretation_hint: ContentLabel::CompositionData,
        };
        assert!(table.is_ragged());
    }

    #[test]
    fn test_page_labels_union() {
        let mut page = sample_page(vec![ContentLabel::CompositionData]);
        page.tables.push(TableBlock {
            headers: vec!["项目".to_string()],
            rows: vec![],
            interpretation_hint: ContentLabel::Measurements,
        });

        let labels = page.labels();
        assert!(labels.contains(&ContentLabel::CompositionData));
        assert!(labels.contains(&ContentLabel::Measurements));
    }

    #[test]
    fn test_unlabeled_page() {
        assert!(sample_page(vec![]).is_unlabeled());
        assert!(sample_page(vec![ContentLabel::Other]).is_unlabeled());
        assert!(!sample_page(vec![ContentLabel::Toxicity]).is_unlabeled());
    }

    #[test]
    fn test_pending_phase_derivation() {
        let mut state = empty_state();
        assert_eq!(pending_phase(&state), PipelinePhase::Extract);

        state.extraction = Some(ExtractionPack::default());
        assert_eq!(pending_phase(&state), PipelinePhase::Plan);

        state.subagent_specs.push(SubagentSpec {
            name: "regulatory".to_string(),
            archetype: SubagentArchetype::Regulatory,
            task_description: "核查法规".to_string(),
            content_payload: ExtractionPack::default(),
            tools_allowed: vec![],
            priority: 5,
        });
        assert_eq!(pending_phase(&state), PipelinePhase::Analyze);

        state.subagent_results.push(SubagentResult {
            spec_name: "regulatory".to_string(),
            status: SubagentStatus::Failed,
            content: String::new(),
            error_detail: Some("模拟失败".to_string()),
            token_usage: TokenUsage::default(),
            duration_secs: 0.1,
        });
        assert_eq!(pending_phase(&state), PipelinePhase::Synthesize);

        state.synthesis = Some(Synthesis {
            risk_narrative: "叙述".to_string(),
            feasibility: FeasibilityClass::Inconclusive,
            key_risks: vec![],
            coverage_gaps: vec!["regulatory".to_string()],
        });
        assert_eq!(pending_phase(&state), PipelinePhase::Compose);

        state.final_report = Some("报告".to_string());
        assert_eq!(pending_phase(&state), PipelinePhase::Done);
    }

    #[test]
    fn test_pending_phase_degraded_synthesis() {
        // 综合被跳过时直接进入Compose，不会反复重试综合
        let mut state = empty_state();
        state.extraction = Some(ExtractionPack::default());
        state.subagent_specs.push(SubagentSpec {
            name: "toxicity".to_string(),
            archetype: SubagentArchetype::Toxicity,
            task_description: "毒理".to_string(),
            content_payload: ExtractionPack::default(),
            tools_allowed: vec![],
            priority: 5,
        });
        state.subagent_results.push(SubagentResult {
            spec_name: "toxicity".to_string(),
            status: SubagentStatus::Ok,
            content: "结论".to_string(),
            error_detail: None,
            token_usage: TokenUsage::default(),
            duration_secs: 1.0,
        });
        state.synthesis_skipped = true;

        assert_eq!(pending_phase(&state), PipelinePhase::Compose);
    }

    #[test]
    fn test_run_summary_distinguishes_partial_from_failure() {
        let mut state = empty_state();
        state.status = WorkflowStatus::Completed;
        for (name, status) in [
            ("a", SubagentStatus::Ok),
            ("b", SubagentStatus::Ok),
            ("c", SubagentStatus::TimedOut),
        ] {
            state.subagent_results.push(SubagentResult {
                spec_name: name.to_string(),
                status,
                content: String::new(),
                error_detail: None,
                token_usage: TokenUsage::default(),
                duration_secs: 0.0,
            });
        }

        let summary = state.run_summary();
        assert!(summary.contains("3"));
        assert!(summary.contains("1"));
        assert!(!summary.contains("失败"));

        let failed = empty_state().with_status(WorkflowStatus::Failed);
        assert!(failed.run_summary().contains("失败"));
    }

    #[test]
    fn test_diagnostics_append_only() {
        let state = empty_state()
            .push_warning("plan", "单位未核实")
            .push_error("extract", "页数不符");
        assert_eq!(state.warnings.len(), 1);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.warnings[0].stage, "plan");
    }

    #[test]
    fn test_extraction_pack_counters() {
        let pack = ExtractionPack {
            documents: vec![DocumentExtraction {
                filename: "sds.pdf".to_string(),
                pages: vec![
                    sample_page(vec![ContentLabel::CompositionData]),
                    sample_page(vec![]),
                ],
            }],
            extraction_notes: vec![],
        };
        assert_eq!(pack.total_pages(), 2);
        assert!(pack.has_label(ContentLabel::CompositionData));
        assert!(!pack.has_label(ContentLabel::Regulatory));
    }
}
