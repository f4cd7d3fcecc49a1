//! 知识库检索工具

use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{KnowledgeSearcher, render_hits};

/// 知识库检索工具 - 检索内部工艺知识与历史评估案例
#[derive(Clone)]
pub struct AgentToolKnowledgeSearch {
    searcher: Arc<dyn KnowledgeSearcher>,
}

/// 检索参数
#[derive(Debug, Deserialize)]
pub struct KnowledgeSearchArgs {
    /// 检索问题或关键词
    pub query: String,
    /// 返回条数上限
    pub limit: Option<usize>,
}

/// 检索结果
#[derive(Debug, Serialize)]
pub struct KnowledgeSearchResult {
    pub result_text: String,
    pub hit_count: usize,
}

/// 知识库检索工具错误
#[derive(Debug)]
pub struct KnowledgeSearchError(String);

impl std::fmt::Display for KnowledgeSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "knowledge_search error: {}", self.0)
    }
}

impl std::error::Error for KnowledgeSearchError {}

impl AgentToolKnowledgeSearch {
    pub fn new(searcher: Arc<dyn KnowledgeSearcher>) -> Self {
        Self { searcher }
    }
}

impl Tool for AgentToolKnowledgeSearch {
    const NAME: &'static str = "knowledge_search";

    type Error = KnowledgeSearchError;
    type Args = KnowledgeSearchArgs;
    type Output = KnowledgeSearchResult;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "检索内部工艺知识库与历史可行性评估案例，用于解释专业术语、确认单位换算、查询工艺极限参数。"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "检索问题或关键词"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "返回条数上限（默认3）"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        println!("   🔧 tool called...knowledge_search@{}", args.query);

        let limit = args.limit.unwrap_or(3).clamp(1, 10);
        let hits = self
            .searcher
            .search(&args.query, limit)
            .await
            .map_err(|e| KnowledgeSearchError(format!("{:#}", e)))?;

        Ok(KnowledgeSearchResult {
            result_text: render_hits(&hits),
            hit_count: hits.len(),
        })
    }
}
