//! 运行注册表与状态机 - 编排层
//!
//! 持有运行记录的唯一写入口，负责：
//!
//! 1. **幂等创建**：同一幂等键下已有活跃运行时原样返回其ID
//! 2. **状态机约束**：所有状态变更走合法转移表，终态不可再转移
//! 3. **ID 分配**：时间戳 + 进程内计数器

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::error::{AppError, StoreError};
use crate::infrastructure::run_store::RunStore;
use crate::models::run::{Run, RunStatus, StateMap};

/// 创建结果
pub enum CreateOutcome {
    /// 新建的运行
    Created(Run),
    /// 幂等命中，返回已有活跃运行的ID
    Existing(String),
}

/// 运行注册表
pub struct RunRegistry {
    store: Arc<dyn RunStore>,
    id_counter: AtomicU64,
}

impl RunRegistry {
    /// 创建新的注册表
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            id_counter: AtomicU64::new(1),
        }
    }

    /// 创建运行（按幂等键去重）
    pub fn create(
        &self,
        workflow: &str,
        input: JsonValue,
        idempotency_key: Option<&str>,
    ) -> Result<CreateOutcome> {
        if let Some(key) = idempotency_key {
            if let Some(existing_id) = self.store.find_active_by_key(key) {
                info!("幂等键 {} 命中活跃运行 {}，不再新建", key, existing_id);
                return Ok(CreateOutcome::Existing(existing_id));
            }
        }

        let run = Run::new(
            self.next_run_id(),
            workflow.to_string(),
            input,
            idempotency_key.map(str::to_string),
        );
        self.store.insert_run(run.clone())?;
        Ok(CreateOutcome::Created(run))
    }

    /// 读取运行记录
    pub fn get(&self, run_id: &str) -> Result<Run> {
        self.store.load_run(run_id).map_err(|e| match e {
            StoreError::RunNotFound { run_id } => AppError::run_not_found(run_id).into(),
            other => anyhow::Error::from(other),
        })
    }

    /// 状态转移（合法性检查）
    pub fn transition(&self, run_id: &str, to: RunStatus) -> Result<Run> {
        let mut run = self.get(run_id)?;
        if !run.status.can_transition_to(to) {
            return Err(AppError::illegal_transition(run_id, run.status, to).into());
        }
        debug!("[运行 {}] 状态转移: {} → {}", run_id, run.status, to);
        run.status = to;
        self.store.update_run(&run)?;
        Ok(run)
    }

    /// 标记失败并记录错误信息
    pub fn mark_failed(&self, run_id: &str, message: impl Into<String>) -> Result<Run> {
        let mut run = self.get(run_id)?;
        if !run.status.can_transition_to(RunStatus::Failed) {
            return Err(
                AppError::illegal_transition(run_id, run.status, RunStatus::Failed).into(),
            );
        }
        run.status = RunStatus::Failed;
        run.error = Some(message.into());
        self.store.update_run(&run)?;
        Ok(run)
    }

    /// 写入输出快照
    pub fn set_output(&self, run_id: &str, output: StateMap) -> Result<()> {
        let mut run = self.get(run_id)?;
        run.output = Some(output);
        self.store.update_run(&run)?;
        Ok(())
    }

    fn next_run_id(&self) -> String {
        let serial = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "run-{}-{:04}",
            Local::now().format("%Y%m%d%H%M%S"),
            serial
        )
    }
}
