//! 工具桥 - 将子分析分支发出的工具调用请求分发给外部协作方
//!
//! 工具注册表是固定的：产品目录检索、知识库检索、联网检索。每个工具背后的
//! 协作方以trait形式接入，对核心而言是无状态、可重入的服务，允许多个并行
//! 分支同时调用。

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod catalog_search;
pub mod knowledge_search;
pub mod web_search;

pub use catalog_search::AgentToolCatalogSearch;
pub use knowledge_search::AgentToolKnowledgeSearch;
pub use web_search::AgentToolWebSearch;

/// 固定工具注册表中的工具标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ToolName {
    #[serde(rename = "catalog_search")]
    CatalogSearch,
    #[serde(rename = "knowledge_search")]
    KnowledgeSearch,
    #[serde(rename = "web_search")]
    WebSearch,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::CatalogSearch => "catalog_search",
            ToolName::KnowledgeSearch => "knowledge_search",
            ToolName::WebSearch => "web_search",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 工具调用的统一结果形态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHit {
    pub result_text: String,
    pub citations: Vec<String>,
}

/// 产品目录检索协作方（向量相似检索，对核心不透明）
#[async_trait]
pub trait CatalogSearcher: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ToolHit>>;
}

/// 知识库检索协作方
#[async_trait]
pub trait KnowledgeSearcher: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ToolHit>>;
}

/// 联网检索协作方
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ToolHit>>;
}

/// 未接入协作方时的占位实现，调用即失败
///
/// 工具失败是分支内可容忍的降级事件，不会中断分析流程。
pub struct UnconfiguredSearcher;

#[async_trait]
impl CatalogSearcher for UnconfiguredSearcher {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ToolHit>> {
        anyhow::bail!("产品目录检索服务未接入")
    }
}

#[async_trait]
impl KnowledgeSearcher for UnconfiguredSearcher {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<ToolHit>> {
        anyhow::bail!("知识库检索服务未接入")
    }
}

#[async_trait]
impl WebSearcher for UnconfiguredSearcher {
    async fn search(&self, _query: &str) -> Result<Vec<ToolHit>> {
        anyhow::bail!("联网检索服务未接入")
    }
}

/// 工具注册表：持有所有协作方引用，按任务的工具白名单裁剪出工具集
#[derive(Clone)]
pub struct ToolRegistry {
    pub catalog: Arc<dyn CatalogSearcher>,
    pub knowledge: Arc<dyn KnowledgeSearcher>,
    pub web: Arc<dyn WebSearcher>,
}

impl ToolRegistry {
    /// 生产默认：协作方留空位，未接入的工具调用即失败
    pub fn unconfigured() -> Self {
        Self {
            catalog: Arc::new(UnconfiguredSearcher),
            knowledge: Arc::new(UnconfiguredSearcher),
            web: Arc::new(UnconfiguredSearcher),
        }
    }

    /// 按白名单生成某个子分析分支可见的工具集
    pub fn toolset_for(&self, allowed: &[ToolName]) -> ToolSet {
        ToolSet {
            catalog: allowed
                .contains(&ToolName::CatalogSearch)
                .then(|| AgentToolCatalogSearch::new(self.catalog.clone())),
            knowledge: allowed
                .contains(&ToolName::KnowledgeSearch)
                .then(|| AgentToolKnowledgeSearch::new(self.knowledge.clone())),
            web: allowed
                .contains(&ToolName::WebSearch)
                .then(|| AgentToolWebSearch::new(self.web.clone())),
        }
    }
}

/// 一次模型调用可见的工具集合
#[derive(Clone, Default)]
pub struct ToolSet {
    pub catalog: Option<AgentToolCatalogSearch>,
    pub knowledge: Option<AgentToolKnowledgeSearch>,
    pub web: Option<AgentToolWebSearch>,
}

impl ToolSet {
    pub fn is_empty(&self) -> bool {
        self.catalog.is_none() && self.knowledge.is_none() && self.web.is_none()
    }
}

/// 将命中结果渲染为回馈给模型的文本
pub(crate) fn render_hits(hits: &[ToolHit]) -> String {
    if hits.is_empty() {
        return "（无命中结果）".to_string();
    }
    let mut text = String::new();
    for (i, hit) in hits.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, hit.result_text));
        for citation in &hit.citations {
            text.push_str(&format!("   来源: {}\n", citation));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolset_respects_allowlist() {
        let registry = ToolRegistry::unconfigured();

        let toolset = registry.toolset_for(&[ToolName::CatalogSearch, ToolName::WebSearch]);
        assert!(toolset.catalog.is_some());
        assert!(toolset.knowledge.is_none());
        assert!(toolset.web.is_some());

        let empty = registry.toolset_for(&[]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_render_hits() {
        let hits = vec![ToolHit {
            result_text: "环氧树脂E-44，粘度12000mPa·s".to_string(),
            citations: vec!["catalog#1024".to_string()],
        }];
        let text = render_hits(&hits);
        assert!(text.contains("E-44"));
        assert!(text.contains("catalog#1024"));

        assert!(render_hits(&[]).contains("无命中"));
    }

    #[tokio::test]
    async fn test_unconfigured_searcher_fails() {
        let searcher = UnconfiguredSearcher;
        assert!(CatalogSearcher::search(&searcher, "query", 5).await.is_err());
    }
}
