//! 产品目录检索工具

use rig::tool::Tool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{CatalogSearcher, render_hits};

/// 产品目录检索工具 - 在企业产品库中做相似度检索
#[derive(Clone)]
pub struct AgentToolCatalogSearch {
    searcher: Arc<dyn CatalogSearcher>,
}

/// 检索参数
#[derive(Debug, Deserialize)]
pub struct CatalogSearchArgs {
    /// 检索关键词（物质名称、CAS号、性能指标描述等）
    pub query: String,
    /// 返回条数上限
    pub limit: Option<usize>,
}

/// 检索结果
#[derive(Debug, Serialize)]
pub struct CatalogSearchResult {
    pub result_text: String,
    pub hit_count: usize,
}

/// 目录检索工具错误
#[derive(Debug)]
pub struct CatalogSearchError(String);

impl std::fmt::Display for CatalogSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "catalog_search error: {}", self.0)
    }
}

impl std::error::Error for CatalogSearchError {}

impl AgentToolCatalogSearch {
    pub fn new(searcher: Arc<dyn CatalogSearcher>) -> Self {
        Self { searcher }
    }
}

impl Tool for AgentToolCatalogSearch {
    const NAME: &'static str = "catalog_search";

    type Error = CatalogSearchError;
    type Args = CatalogSearchArgs;
    type Output = CatalogSearchResult;

    async fn definition(&self, _prompt: String) -> rig::completion::ToolDefinition {
        rig::completion::ToolDefinition {
            name: Self::NAME.to_string(),
            description: "在企业产品目录中按相似度检索产品记录，用于查找与询单物料匹配的现有产品或配方。"
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "检索关键词，可以是物质名称、CAS号或性能指标描述"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "返回条数上限（默认5）"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        println!("   🔧 tool called...catalog_search@{}", args.query);

        let limit = args.limit.unwrap_or(5).clamp(1, 20);
        let hits = self
            .searcher
            .search(&args.query, limit)
            .await
            .map_err(|e| CatalogSearchError(format!("{:#}", e)))?;

        Ok(CatalogSearchResult {
            result_text: render_hits(&hits),
            hit_count: hits.len(),
        })
    }
}
