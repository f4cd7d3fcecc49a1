//! 联网检索工具

use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{WebSearcher, render_hits};

/// 联网检索工具 - 查询公开法规条目与物质公开资料
#[derive(Clone)]
pub struct AgentToolWebSearch {
    searcher: Arc<dyn WebSearcher>,
}

/// 检索参数
#[derive(Debug, Deserialize)]
pub struct WebSearchArgs {
    /// 检索关键词
    pub query: String,
}

/// 检索结果
#[derive(Debug, Serialize)]
pub struct WebSearchResult {
    pub result_text: String,
    pub hit_count: usize,
}

/// 联网检索工具错误
#[derive(Debug)]
pub struct WebSearchError(String);

impl std::fmt::Display for WebSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "web_search error: {}", self.0)
    }
}

impl std::error::Error for WebSearchError {}

impl AgentToolWebSearch {
    pub fn new(searcher: Arc<dyn WebSearcher>) -> Self {
        Self { searcher }
    }
}

impl Tool for AgentToolWebSearch {
    const NAME: &'static str = "web_search";

    type Error = WebSearchError;
    type Args = WebSearchArgs;
    type Output = WebSearchResult;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "联网检索公开信息，用于查询法规条目（REACH、GHS分类等）与物质的公开理化数据。"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "检索关键词"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        println!("   🔧 tool called...web_search@{}", args.query);

        let hits = self
            .searcher
            .search(&args.query)
            .await
            .map_err(|e| WebSearchError(format!("{:#}", e)))?;

        Ok(WebSearchResult {
            result_text: render_hits(&hits),
            hit_count: hits.len(),
        })
    }
}
