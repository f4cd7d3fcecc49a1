//! 流水线上下文

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::llm::client::LLMClient;
use crate::llm::tools::ToolRegistry;
use crate::pipeline::agent_ops::{LiveInvoker, ModelInvoker};
use crate::pipeline::events::EventBus;
use crate::prompts::PromptLibrary;
use crate::storage::{CheckpointStore, FileCheckpointStore};

/// 贯穿所有阶段的共享上下文
#[derive(Clone)]
pub struct PipelineContext {
    /// LLM调用器，用于与AI通信。
    pub llm_client: LLMClient,
    /// 配置
    pub config: Config,
    /// 提示词库
    pub prompts: Arc<PromptLibrary>,
    /// 缓存管理器
    pub cache_manager: Arc<RwLock<CacheManager>>,
    /// 检查点存储
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// 工具注册表
    pub tools: ToolRegistry,
    /// 模型调用入口
    pub invoker: Arc<dyn ModelInvoker>,
    /// 事件总线
    pub events: EventBus,
}

impl PipelineContext {
    /// 创建新的流水线上下文，检查点落在internal_path下
    pub fn new(config: Config) -> Result<Self> {
        let llm_client = LLMClient::new(config.clone())?;
        let cache_manager = Arc::new(RwLock::new(CacheManager::new(config.cache.clone())));
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(&config.internal_path));

        Ok(Self {
            llm_client,
            config,
            prompts: Arc::new(PromptLibrary::builtin()),
            cache_manager,
            checkpoints,
            tools: ToolRegistry::unconfigured(),
            invoker: Arc::new(LiveInvoker),
            events: EventBus::default(),
        })
    }

    /// 替换检查点存储（测试用内存实现）
    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// 替换工具注册表
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// 替换模型调用入口（测试用脚本化实现）
    pub fn with_invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invoker = invoker;
        self
    }
}
