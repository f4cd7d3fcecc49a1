//! 工作流事件
//!
//! 每次状态推进都会发布一条事件快照，调用方可订阅用于进度展示或联动。
//! 无订阅者时发布直接丢弃，不阻塞工作流。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::pipeline::state::{Diagnostic, WorkflowState, WorkflowStatus};

/// 一次状态推进的事件快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub session_id: String,
    pub status: WorkflowStatus,
    pub timestamp: DateTime<Utc>,
    /// 仅在completed时携带
    pub final_report: Option<String>,
    /// 终态事件携带完整的错误记录，订阅方不必回查快照
    pub errors: Vec<Diagnostic>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl WorkflowEvent {
    pub fn from_state(state: &WorkflowState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            status: state.status,
            timestamp: Utc::now(),
            final_report: if state.status == WorkflowStatus::Completed {
                state.final_report.clone()
            } else {
                None
            },
            errors: if state.status.is_terminal() {
                state.errors.clone()
            } else {
                Vec::new()
            },
            error_count: state.errors.len(),
            warning_count: state.warnings.len(),
        }
    }
}

/// 基于tokio broadcast的事件总线
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// 发布事件；没有订阅者时静默丢弃
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
