//! 存储抽象 - 基础设施层
//!
//! 持久化布局分三部分：运行记录、按 (run_id, sequence) 键控的只追加
//! 事件日志、按运行身份键控的检查点。引擎只通过 `RunStore` trait 访问，
//! 测试和离线模式注入内存实现，生产环境可替换为持久化表。

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Local;
use serde_json::Value as JsonValue;

use crate::error::StoreError;
use crate::models::run::{Checkpoint, EventKind, Run, RunEvent};

/// 运行存储能力
///
/// 职责：
/// - 运行记录的增查改
/// - 事件日志的追加与按序读取（序号由存储分配，保证连续无空洞）
/// - 检查点的保存与读取
/// - 不认识阶段 / 工作流，不做状态机检查
pub trait RunStore: Send + Sync {
    /// 插入新的运行记录
    fn insert_run(&self, run: Run) -> Result<(), StoreError>;

    /// 读取运行记录
    fn load_run(&self, run_id: &str) -> Result<Run, StoreError>;

    /// 覆盖写回运行记录
    fn update_run(&self, run: &Run) -> Result<(), StoreError>;

    /// 查找幂等键对应的活跃运行
    fn find_active_by_key(&self, idempotency_key: &str) -> Option<String>;

    /// 追加事件并分配序号
    ///
    /// 流结束标记之后的追加会被拒绝（晚到输出可安全丢弃）。
    fn append_event(
        &self,
        run_id: &str,
        kind: EventKind,
        stage: Option<String>,
        payload: JsonValue,
    ) -> Result<RunEvent, StoreError>;

    /// 按序号读取单条事件（序号从 1 开始）
    fn event_at(&self, run_id: &str, sequence: u64) -> Option<RunEvent>;

    /// 读取全部事件日志
    fn events(&self, run_id: &str) -> Vec<RunEvent>;

    /// 保存检查点（按运行身份覆盖）
    fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// 读取检查点
    fn load_checkpoint(&self, run_id: &str) -> Option<Checkpoint>;

    /// 清除检查点（成功结束后输出快照接管）
    fn clear_checkpoint(&self, run_id: &str);
}

#[derive(Default)]
struct StoreInner {
    runs: HashMap<String, Run>,
    events: HashMap<String, Vec<RunEvent>>,
    checkpoints: HashMap<String, Checkpoint>,
}

/// 内存存储实现
///
/// 单写多读，内部用读写锁保护；测试与离线回放模式使用。
#[derive(Default)]
pub struct MemoryRunStore {
    inner: RwLock<StoreInner>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn insert_run(&self, run: Run) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("运行存储锁中毒");
        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::DuplicateRun { run_id: run.id });
        }
        inner.runs.insert(run.id.clone(), run);
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Run, StoreError> {
        let inner = self.inner.read().expect("运行存储锁中毒");
        inner
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    fn update_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("运行存储锁中毒");
        if !inner.runs.contains_key(&run.id) {
            return Err(StoreError::RunNotFound {
                run_id: run.id.clone(),
            });
        }
        let mut updated = run.clone();
        updated.updated_at = Local::now();
        inner.runs.insert(run.id.clone(), updated);
        Ok(())
    }

    fn find_active_by_key(&self, idempotency_key: &str) -> Option<String> {
        let inner = self.inner.read().expect("运行存储锁中毒");
        inner
            .runs
            .values()
            .find(|r| {
                r.status.is_active() && r.idempotency_key.as_deref() == Some(idempotency_key)
            })
            .map(|r| r.id.clone())
    }

    fn append_event(
        &self,
        run_id: &str,
        kind: EventKind,
        stage: Option<String>,
        payload: JsonValue,
    ) -> Result<RunEvent, StoreError> {
        let mut inner = self.inner.write().expect("运行存储锁中毒");
        let log = inner.events.entry(run_id.to_string()).or_default();

        // 流结束之后拒绝追加
        if log.last().is_some_and(|e| e.kind.is_end_of_stream()) {
            return Err(StoreError::EventLogClosed {
                run_id: run_id.to_string(),
            });
        }

        let event = RunEvent {
            sequence: log.len() as u64 + 1,
            kind,
            stage,
            payload,
        };
        log.push(event.clone());
        Ok(event)
    }

    fn event_at(&self, run_id: &str, sequence: u64) -> Option<RunEvent> {
        if sequence == 0 {
            return None;
        }
        let inner = self.inner.read().expect("运行存储锁中毒");
        inner
            .events
            .get(run_id)
            .and_then(|log| log.get(sequence as usize - 1))
            .cloned()
    }

    fn events(&self, run_id: &str) -> Vec<RunEvent> {
        let inner = self.inner.read().expect("运行存储锁中毒");
        inner.events.get(run_id).cloned().unwrap_or_default()
    }

    fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("运行存储锁中毒");
        inner
            .checkpoints
            .insert(checkpoint.run_id.clone(), checkpoint);
        Ok(())
    }

    fn load_checkpoint(&self, run_id: &str) -> Option<Checkpoint> {
        let inner = self.inner.read().expect("运行存储锁中毒");
        inner.checkpoints.get(run_id).cloned()
    }

    fn clear_checkpoint(&self, run_id: &str) {
        let mut inner = self.inner.write().expect("运行存储锁中毒");
        inner.checkpoints.remove(run_id);
    }
}
