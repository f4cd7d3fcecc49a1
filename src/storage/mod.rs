//! 检查点存储
//!
//! 每次状态替换后整体落盘一份`WorkflowState`快照。落盘采用先写临时文件再
//! 原子重命名，保证崩溃时磁盘上要么是旧快照要么是新快照，不会出现半截
//! JSON。

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::pipeline::state::WorkflowState;

/// 检查点存储接口
///
/// 实现必须保证persist成功返回后load能读到该快照（或更新的快照）。
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 持久化一份状态快照
    async fn persist(&self, state: &WorkflowState) -> Result<()>;

    /// 按会话ID加载最近一次快照，不存在时返回None
    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>>;
}

/// 基于文件系统的检查点存储
///
/// 目录布局: `<root>/checkpoints/<session_id>/latest.json`
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(internal_path: impl AsRef<Path>) -> Self {
        Self {
            root: internal_path.as_ref().join("checkpoints"),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn latest_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("latest.json")
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn persist(&self, state: &WorkflowState) -> Result<()> {
        let dir = self.session_dir(&state.session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建检查点目录失败: {}", dir.display()))?;

        let json = serde_json::to_string_pretty(state).context("序列化工作流状态失败")?;

        // 先写临时文件再重命名，避免半写快照
        let tmp_path = dir.join("latest.json.tmp");
        let final_path = self.latest_path(&state.session_id);
        tokio::fs::write(&tmp_path, &json)
            .await
            .with_context(|| format!("写入检查点临时文件失败: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("替换检查点文件失败: {}", final_path.display()))?;

        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>> {
        let path = self.latest_path(session_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("读取检查点失败: {}", path.display()))?;
        let state: WorkflowState =
            serde_json::from_str(&content).context("解析工作流状态快照失败")?;
        Ok(Some(state))
    }
}

/// 内存检查点存储，用于测试
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: Arc<RwLock<HashMap<String, WorkflowState>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已持久化的快照数量
    pub async fn session_count(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn persist(&self, state: &WorkflowState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.states.read().await.get(session_id).cloned())
    }
}
