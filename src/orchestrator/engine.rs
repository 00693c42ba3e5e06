//! 阅卷引擎门面 - 编排层
//!
//! 对外暴露运行的全部操作：提交、查询、事件流、取消、重试、
//! 恢复输入。内部组合注册表、调速器、事件总线与驱动器，
//! 存储与评分服务都以抽象注入。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, RunError, StoreError};
use crate::infrastructure::run_store::RunStore;
use crate::infrastructure::scorer::PageScorer;
use crate::models::run::{EventKind, RunEvent, RunStatus, StateMap};
use crate::orchestrator::driver::{ExecutionDriver, PENDING_INTERRUPT_FIELD};
use crate::orchestrator::event_bus::{EventBus, RunEventStream};
use crate::orchestrator::governor::Governor;
use crate::orchestrator::registry::{CreateOutcome, RunRegistry};
use crate::workflow::batch_grading_workflow;
use crate::workflow::stage::{InterruptRequest, Workflow};

/// 状态查询报告
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: RunStatus,
    pub progress: RunProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 运行进度
#[derive(Debug, Clone, Serialize)]
pub struct RunProgress {
    /// 当前（或即将执行）的阶段名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub completed_stages: usize,
    pub total_stages: usize,
    /// 已有评分结果的页数
    pub pages_graded: usize,
}

/// 引擎内核（驱动器与门面共享）
pub(crate) struct EngineCore {
    pub(crate) store: Arc<dyn RunStore>,
    pub(crate) registry: RunRegistry,
    pub(crate) bus: EventBus,
    pub(crate) governor: Governor,
    pub(crate) scorer: Arc<dyn PageScorer>,
    pub(crate) workflows: RwLock<HashMap<String, Arc<Workflow>>>,
    cancel_flags: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl EngineCore {
    /// 登记取消信号通道（已存在则复用，保证 cancel 能找到发送端）
    pub(crate) fn register_cancel_flag(&self, run_id: &str) -> watch::Receiver<bool> {
        let mut flags = self.cancel_flags.lock().expect("取消信号锁中毒");
        if let Some(sender) = flags.get(run_id) {
            return sender.subscribe();
        }
        let (tx, rx) = watch::channel(false);
        flags.insert(run_id.to_string(), tx);
        rx
    }

    pub(crate) fn remove_cancel_flag(&self, run_id: &str) {
        let mut flags = self.cancel_flags.lock().expect("取消信号锁中毒");
        flags.remove(run_id);
    }

    fn signal_cancel(&self, run_id: &str) {
        let flags = self.cancel_flags.lock().expect("取消信号锁中毒");
        if let Some(sender) = flags.get(run_id) {
            let _ = sender.send(true);
        }
    }

    pub(crate) fn workflow(&self, name: &str) -> Option<Arc<Workflow>> {
        let workflows = self.workflows.read().expect("工作流注册锁中毒");
        workflows.get(name).cloned()
    }
}

/// 阅卷引擎
pub struct GradingEngine {
    core: Arc<EngineCore>,
}

impl GradingEngine {
    /// 创建新引擎并注册内置的批量阅卷工作流
    pub fn new(config: Config, store: Arc<dyn RunStore>, scorer: Arc<dyn PageScorer>) -> Self {
        let core = EngineCore {
            store: store.clone(),
            registry: RunRegistry::new(store.clone()),
            bus: EventBus::new(
                store,
                Duration::from_millis(config.event_poll_interval_ms.max(10)),
            ),
            governor: Governor::new(&config),
            scorer,
            workflows: RwLock::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
        };
        let engine = Self {
            core: Arc::new(core),
        };
        engine.register_workflow(batch_grading_workflow(&config));
        engine
    }

    /// 注册工作流（同名覆盖）
    pub fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.core.workflows.write().expect("工作流注册锁中毒");
        workflows.insert(workflow.name.clone(), Arc::new(workflow));
    }

    /// 提交运行
    ///
    /// 未知工作流、非法载荷同步拒绝，不创建运行；
    /// 幂等键命中活跃运行时原样返回其ID，不会重复启动。
    pub fn start_run(
        &self,
        workflow: &str,
        payload: JsonValue,
        idempotency_key: Option<&str>,
    ) -> Result<String> {
        let definition = self
            .core
            .workflow(workflow)
            .ok_or_else(|| AppError::unknown_workflow(workflow))?;

        if let Some(validate) = definition.validate_input {
            validate(&payload)?;
        }

        match self
            .core
            .registry
            .create(workflow, payload, idempotency_key)?
        {
            CreateOutcome::Existing(run_id) => Ok(run_id),
            CreateOutcome::Created(run) => {
                info!("[运行 {}] 📥 已提交 (工作流 {})", run.id, workflow);
                ExecutionDriver::spawn(self.core.clone(), run.id.clone(), definition);
                Ok(run.id)
            }
        }
    }

    /// 查询运行状态与进度
    pub fn get_status(&self, run_id: &str) -> Result<StatusReport> {
        let run = self.core.registry.get(run_id)?;
        let total_stages = self
            .core
            .workflow(&run.workflow)
            .map(|w| w.stages.len())
            .unwrap_or(0);

        let checkpoint = self.core.store.load_checkpoint(run_id);
        let (completed_stages, current_stage) = match run.status {
            RunStatus::Completed => (total_stages, None),
            RunStatus::Pending => (0, None),
            _ => {
                let next = checkpoint.as_ref().map(|c| c.next_stage).unwrap_or(0);
                let current = self.core.workflow(&run.workflow).and_then(|w| {
                    w.stages.get(next).map(|s| s.name().to_string())
                });
                (next.min(total_stages), current)
            }
        };

        let pages_graded = checkpoint
            .as_ref()
            .map(|c| &c.state)
            .or(run.output.as_ref())
            .and_then(|state| state.get("page_results"))
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);

        Ok(StatusReport {
            status: run.status,
            progress: RunProgress {
                current_stage,
                completed_stages,
                total_stages,
                pages_graded,
            },
            error: run.error,
        })
    }

    /// 读取最新累积状态
    ///
    /// 优先返回活动检查点；没有检查点时回落到已持久化的输出快照。
    pub fn get_state(&self, run_id: &str) -> Result<StateMap> {
        let run = self.core.registry.get(run_id)?;
        if let Some(checkpoint) = self.core.store.load_checkpoint(run_id) {
            return Ok(checkpoint.state);
        }
        Ok(run.output.unwrap_or_default())
    }

    /// 读取最终输出快照（未成功结束时为 None）
    pub fn get_final_output(&self, run_id: &str) -> Result<Option<StateMap>> {
        let run = self.core.registry.get(run_id)?;
        Ok(run.output)
    }

    /// 打开事件流
    ///
    /// 从序号 1 追平持久日志后阻塞等待；运行到达终态后流有限结束，
    /// 挂起/恢复期间持续阻塞而不是假结束。
    pub fn stream_run(&self, run_id: &str) -> Result<RunEventStream> {
        let _ = self.core.registry.get(run_id)?;
        Ok(self.core.bus.stream(run_id))
    }

    /// 订阅实时事件分发（只收到订阅之后的事件）
    pub fn subscribe_live(&self, run_id: &str) -> mpsc::UnboundedReceiver<RunEvent> {
        self.core.bus.subscribe_live(run_id)
    }

    /// 读取持久事件日志（补读/审计用）
    pub fn event_log(&self, run_id: &str) -> Vec<RunEvent> {
        self.core.store.events(run_id)
    }

    /// 取消运行（尽力而为）
    ///
    /// 立即标记 CANCELLED 并向驱动任务发停止信号；
    /// 在途的评分调用不保证中止，其晚到输出会被丢弃。
    pub fn cancel(&self, run_id: &str) -> bool {
        let Ok(run) = self.core.registry.get(run_id) else {
            return false;
        };
        if run.status.is_terminal() {
            return false;
        }

        self.core.signal_cancel(run_id);

        match self.core.registry.transition(run_id, RunStatus::Cancelled) {
            Ok(_) => {
                info!("[运行 {}] 🛑 已取消", run_id);
                for (kind, payload) in [
                    (EventKind::RunCancelled, json!({})),
                    (EventKind::EndOfStream, json!({})),
                ] {
                    if let Err(e) = self.core.bus.publish(run_id, kind, None, payload) {
                        warn!("[运行 {}] 取消事件发布失败: {}", run_id, e);
                    }
                }
                true
            }
            Err(e) => {
                warn!("[运行 {}] 取消被拒绝: {}", run_id, e);
                false
            }
        }
    }

    /// 恢复挂起的运行
    ///
    /// 把人工输入写进待处理中断声明的状态字段，然后从检查点续跑；
    /// 中断点之前的阶段不会重放，事件序号继续递增。
    pub fn send_event(&self, run_id: &str, payload: JsonValue) -> Result<()> {
        let run = self.core.registry.get(run_id)?;
        if run.status != RunStatus::Paused {
            return Err(AppError::Run(RunError::NotPaused {
                run_id: run_id.to_string(),
                status: run.status,
            })
            .into());
        }

        let mut checkpoint = self.core.store.load_checkpoint(run_id).ok_or_else(|| {
            AppError::Store(StoreError::CheckpointMissing {
                run_id: run_id.to_string(),
            })
        })?;

        let interrupt_value = checkpoint
            .state
            .remove(PENDING_INTERRUPT_FIELD)
            .ok_or_else(|| {
                AppError::Run(RunError::MissingInterrupt {
                    run_id: run_id.to_string(),
                })
            })?;
        let interrupt: InterruptRequest = serde_json::from_value(interrupt_value)?;

        checkpoint.state.insert(interrupt.answer_field, payload);
        self.core.store.save_checkpoint(checkpoint)?;

        let definition = self
            .core
            .workflow(&run.workflow)
            .ok_or_else(|| AppError::unknown_workflow(&run.workflow))?;

        info!("[运行 {}] ▶️ 收到人工输入，恢复执行", run_id);
        ExecutionDriver::spawn(self.core.clone(), run_id.to_string(), definition);
        Ok(())
    }

    /// 重试运行
    ///
    /// 用原始输入重新提交一个全新的运行，原运行不做任何改动。
    pub fn retry(&self, run_id: &str) -> Result<String> {
        let original = self.core.registry.get(run_id)?;
        info!("[运行 {}] 🔁 重试，提交新运行", run_id);
        self.start_run(&original.workflow, original.input.clone(), None)
    }
}
