//! 运行记录与事件模型
//!
//! 一次"运行"对应一次批量阅卷工作流的执行实例。
//! 运行记录本身只保存输入/输出快照，累积状态保存在检查点里。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 累积状态：若干命名字段组成的 JSON 映射
pub type StateMap = serde_json::Map<String, JsonValue>;

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// 等待调度
    Pending,
    /// 执行中
    Running,
    /// 等待人工输入（中断挂起）
    Paused,
    /// 成功结束
    Completed,
    /// 失败结束
    Failed,
    /// 已取消
    Cancelled,
}

impl RunStatus {
    /// 是否为终态（终态不可再转移）
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// 是否为活跃状态（幂等键只对活跃运行生效）
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Paused)
    }

    /// 状态机合法转移表
    ///
    /// PENDING→RUNNING→(PAUSED↔RUNNING)*→{COMPLETED|FAILED|CANCELLED}
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Pending, Cancelled) | (Pending, Failed) => true,
            (Running, Paused) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Paused, Running) => true,
            (Paused, Cancelled) | (Paused, Failed) => true,
            _ => false,
        }
    }

    /// 获取标准名称
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "等待中",
            Self::Running => "执行中",
            Self::Paused => "已挂起",
            Self::Completed => "已完成",
            Self::Failed => "已失败",
            Self::Cancelled => "已取消",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 运行记录
///
/// 执行期间由自身的驱动任务独占写入，其余各方只读。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// 运行ID
    pub id: String,
    /// 工作流名称
    pub workflow: String,
    /// 当前状态
    pub status: RunStatus,
    /// 输入快照（创建后不再修改）
    pub input: JsonValue,
    /// 输出快照（仅成功结束时写入）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<StateMap>,
    /// 失败信息（仅 FAILED 时写入）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 幂等提交键
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Run {
    /// 创建新的等待中运行记录
    pub fn new(
        id: String,
        workflow: String,
        input: JsonValue,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Local::now();
        Self {
            id,
            workflow,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            idempotency_key,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 事件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StageStarted,
    StageCompleted,
    RunPaused,
    RunResumed,
    FinalSnapshot,
    RunCompleted,
    RunFailed,
    RunCancelled,
    /// 流结束标记：只在真正终态时追加，挂起时绝不追加
    EndOfStream,
}

impl EventKind {
    pub fn is_end_of_stream(self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// 运行事件
///
/// 不可变、按序号全序排列、每个运行一条只追加日志。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// 序号，从 1 开始、严格递增、无空洞
    pub sequence: u64,
    pub kind: EventKind,
    /// 关联的阶段名（运行级事件为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub payload: JsonValue,
}

/// 检查点
///
/// 可序列化的挂起任务记录：`run_id` 即恢复令牌，
/// `next_stage` 指向恢复后要执行的阶段下标。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub next_stage: usize,
    pub state: StateMap,
    pub updated_at: DateTime<Local>,
}

impl Checkpoint {
    pub fn new(run_id: String, next_stage: usize, state: StateMap) -> Self {
        Self {
            run_id,
            next_stage,
            state,
            updated_at: Local::now(),
        }
    }
}
