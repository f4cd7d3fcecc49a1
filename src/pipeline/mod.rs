//! 评估流水线
//!
//! 五个阶段顺序推进：提取 → 规划 → 子分析扇出扇入 → 风险综合 → 报告撰写。

pub mod agent_ops;
pub mod analyze;
pub mod compose;
pub mod context;
pub mod events;
pub mod extract;
pub mod plan;
pub mod state;
pub mod synthesize;
pub mod workflow;
