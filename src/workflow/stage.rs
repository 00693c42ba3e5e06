//! 阶段抽象 - 流程层
//!
//! 阶段是运行执行图里的命名工作单元。阶段不直接改状态，
//! 而是返回带显式合并策略的状态增量，由驱动器统一、确定性地应用。
//!
//! 挂起信号有两条独立通路：阶段产出里的显式中断标记，
//! 以及登记在阶段上下文里的未决续体。历史上主通路曾悄悄丢过标记，
//! 驱动器对两条通路都做检查，任一命中即判定挂起。

use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use crate::infrastructure::scorer::PageScorer;
use crate::models::run::StateMap;

/// 状态字段合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// 追加到数组字段末尾（累积型字段，如评分结果列表）
    Append,
    /// 整体覆盖（标量型字段）
    Overwrite,
}

/// 带标签的状态增量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDelta {
    pub field: String,
    pub strategy: MergeStrategy,
    pub value: JsonValue,
}

impl StateDelta {
    /// 创建追加增量
    pub fn append(field: impl Into<String>, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            strategy: MergeStrategy::Append,
            value,
        }
    }

    /// 创建覆盖增量
    pub fn overwrite(field: impl Into<String>, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            strategy: MergeStrategy::Overwrite,
            value,
        }
    }
}

/// 中断请求：阶段请求人工输入时挂起运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// 挂起原因（面向人的描述）
    pub reason: String,
    /// 恢复输入写入的状态字段名
    pub answer_field: String,
    /// 附加信息（例如待复核的页下标）
    pub payload: JsonValue,
}

/// 阶段执行产出
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub deltas: Vec<StateDelta>,
    /// 显式中断标记（挂起的主信号）
    pub interrupt: Option<InterruptRequest>,
}

impl StageOutcome {
    /// 正常完成，无增量
    pub fn done() -> Self {
        Self::default()
    }

    /// 正常完成，携带增量
    pub fn with_deltas(deltas: Vec<StateDelta>) -> Self {
        Self {
            deltas,
            interrupt: None,
        }
    }

    /// 请求挂起
    pub fn interrupted(interrupt: InterruptRequest) -> Self {
        Self {
            deltas: Vec::new(),
            interrupt: Some(interrupt),
        }
    }
}

/// 阶段执行上下文
///
/// 封装"我在替哪个运行干活"以及阶段需要的共享能力。
pub struct StageCtx {
    /// 运行ID
    pub run_id: String,
    /// 工作流名称
    pub workflow: String,
    /// 运行的输入快照
    pub input: JsonValue,
    /// 本运行的评分并发上限
    pub grading_concurrency: usize,
    /// 评分服务
    pub scorer: Arc<dyn PageScorer>,
    /// 取消信号
    cancel: watch::Receiver<bool>,
    /// 未决续体登记处（挂起的兜底信号）
    pending_interrupts: Mutex<Vec<InterruptRequest>>,
}

impl StageCtx {
    pub fn new(
        run_id: impl Into<String>,
        workflow: impl Into<String>,
        input: JsonValue,
        grading_concurrency: usize,
        scorer: Arc<dyn PageScorer>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow: workflow.into(),
            input,
            grading_concurrency,
            scorer,
            cancel,
            pending_interrupts: Mutex::new(Vec::new()),
        }
    }

    /// 运行是否已被取消（尽力而为信号）
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// 登记未决续体
    ///
    /// 请求挂起的阶段应当先登记、再把同一个中断放进产出；
    /// 即使产出里的标记丢失，驱动器也能从这里看到挂起意图。
    pub fn raise_interrupt(&self, interrupt: InterruptRequest) {
        self.pending_interrupts
            .lock()
            .expect("中断登记锁中毒")
            .push(interrupt);
    }

    /// 取出最早登记的未决续体（驱动器在每个阶段结束后调用）
    pub fn take_pending_interrupt(&self) -> Option<InterruptRequest> {
        let mut pending = self.pending_interrupts.lock().expect("中断登记锁中毒");
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

/// 阶段：运行执行图里的命名工作单元
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// 执行阶段
    ///
    /// 读取累积状态快照，返回状态增量；不得直接修改状态。
    fn run<'a>(&'a self, ctx: &'a StageCtx, state: &'a StateMap)
        -> BoxFuture<'a, Result<StageOutcome>>;
}

/// 工作流定义：按序执行的阶段列表
pub struct Workflow {
    pub name: String,
    pub stages: Vec<Arc<dyn Stage>>,
    /// 评分并发覆盖值（None 时由调速器按工作流名决定）
    pub grading_concurrency: Option<usize>,
    /// 输入载荷校验（创建运行前同步执行，失败则不创建运行）
    pub validate_input: Option<fn(&JsonValue) -> Result<()>>,
}
