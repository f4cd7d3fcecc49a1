//! 多轮工具调用的配置与响应类型
//!
//! 每个子分析分支是一个有界状态机：等待模型响应 → 等待工具结果 → 终态。
//! 迭代上限是显式的转移护栏；触顶不会被当作普通成功，而是携带截断标记与
//! 部分内容返回，由上层映射为timed_out终态。

/// 多轮对话配置
#[derive(Debug, Clone)]
pub struct ReActConfig {
    /// 工具调用轮次上限
    pub max_iterations: usize,
    /// 触顶时是否返回部分结果（false则直接报错）
    pub return_partial_on_max_depth: bool,
    /// 是否打印详细过程
    pub verbose: bool,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            return_partial_on_max_depth: true,
            verbose: false,
        }
    }
}

/// 多轮对话响应
#[derive(Debug, Clone)]
pub struct ReActResponse {
    /// 最终（或部分）文本内容
    pub content: String,
    /// 实际使用的迭代次数上限
    pub iterations_used: usize,
    /// 是否因达到迭代上限而被截断
    pub stopped_by_max_depth: bool,
    /// 工具调用记录，形如 `tool_name(arguments)`
    pub tool_calls_history: Vec<String>,
}

impl ReActResponse {
    /// 正常完成
    pub fn success(content: String, iterations_used: usize) -> Self {
        Self {
            content,
            iterations_used,
            stopped_by_max_depth: false,
            tool_calls_history: Vec::new(),
        }
    }

    /// 触顶截断，携带部分内容与已执行的工具调用记录
    pub fn max_depth_reached(
        partial_content: String,
        iterations_used: usize,
        tool_calls_history: Vec<String>,
    ) -> Self {
        Self {
            content: partial_content,
            iterations_used,
            stopped_by_max_depth: true,
            tool_calls_history,
        }
    }
}
