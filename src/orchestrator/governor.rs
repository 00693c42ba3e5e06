//! 并发调速器 - 编排层
//!
//! 两个互相独立的有界并发控制：
//!
//! 1. 全局同时执行的运行数上限（信号量，超出的运行保持等待状态排队）
//! 2. 单个运行内同时外呼的评分调用数上限（按工作流类型可配，
//!    批量阅卷工作流有显式覆盖值）

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Config;
use crate::workflow::stage::Workflow;
use crate::workflow::BATCH_GRADING_WORKFLOW;

/// 并发调速器
pub struct Governor {
    global_runs: Arc<Semaphore>,
    default_grading_concurrency: usize,
    batch_grading_concurrency: usize,
}

impl Governor {
    /// 创建新的调速器
    pub fn new(config: &Config) -> Self {
        Self {
            global_runs: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            default_grading_concurrency: config.default_grading_concurrency.max(1),
            batch_grading_concurrency: config.batch_grading_concurrency.max(1),
        }
    }

    /// 申请运行准入许可
    ///
    /// 名额耗尽时挂起等待（运行保持 PENDING 排队）；
    /// 许可随驱动任务结束（含挂起）自动释放，恢复时重新申请。
    pub async fn admit_run(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self.global_runs.clone().acquire_owned().await?;
        Ok(permit)
    }

    /// 当前可用的运行名额（日志与测试用）
    pub fn available_run_slots(&self) -> usize {
        self.global_runs.available_permits()
    }

    /// 工作流的评分并发上限
    ///
    /// 优先级：工作流自带覆盖值 > 批量阅卷显式覆盖 > 默认值
    pub fn grading_concurrency(&self, workflow: &Workflow) -> usize {
        if let Some(limit) = workflow.grading_concurrency {
            return limit.max(1);
        }
        if workflow.name == BATCH_GRADING_WORKFLOW {
            self.batch_grading_concurrency
        } else {
            self.default_grading_concurrency
        }
    }
}
