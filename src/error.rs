use std::fmt;

use crate::models::run::RunStatus;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 输入错误（同步拒绝，不创建运行）
    Input(InputError),
    /// 运行状态机错误
    Run(RunError),
    /// 存储层错误
    Store(StoreError),
    /// 评分服务错误
    Scoring(ScoringError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Input(e) => write!(f, "输入错误: {}", e),
            AppError::Run(e) => write!(f, "运行错误: {}", e),
            AppError::Store(e) => write!(f, "存储错误: {}", e),
            AppError::Scoring(e) => write!(f, "评分服务错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Input(e) => Some(e),
            AppError::Run(e) => Some(e),
            AppError::Store(e) => Some(e),
            AppError::Scoring(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// 输入错误
#[derive(Debug)]
pub enum InputError {
    /// 工作流未注册
    UnknownWorkflow { workflow: String },
    /// 载荷格式不合法
    MalformedPayload { reason: String },
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::UnknownWorkflow { workflow } => {
                write!(f, "未知的工作流: {}", workflow)
            }
            InputError::MalformedPayload { reason } => {
                write!(f, "载荷格式不合法: {}", reason)
            }
        }
    }
}

impl std::error::Error for InputError {}

/// 运行状态机错误
#[derive(Debug)]
pub enum RunError {
    /// 运行不存在
    NotFound { run_id: String },
    /// 非法状态转移
    IllegalTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
    /// 运行不在挂起状态，无法接收恢复输入
    NotPaused { run_id: String, status: RunStatus },
    /// 挂起的运行缺少待处理中断记录
    MissingInterrupt { run_id: String },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::NotFound { run_id } => write!(f, "运行不存在: {}", run_id),
            RunError::IllegalTransition { run_id, from, to } => {
                write!(f, "非法状态转移 (运行 {}): {} → {}", run_id, from, to)
            }
            RunError::NotPaused { run_id, status } => {
                write!(f, "运行 {} 当前为 {}，不在挂起状态", run_id, status)
            }
            RunError::MissingInterrupt { run_id } => {
                write!(f, "运行 {} 缺少待处理的中断记录", run_id)
            }
        }
    }
}

impl std::error::Error for RunError {}

/// 存储层错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("运行记录不存在: {run_id}")]
    RunNotFound { run_id: String },
    #[error("运行记录已存在: {run_id}")]
    DuplicateRun { run_id: String },
    #[error("事件日志已关闭 (运行 {run_id} 已到达终态)")]
    EventLogClosed { run_id: String },
    #[error("检查点不存在: {run_id}")]
    CheckpointMissing { run_id: String },
}

/// 评分服务错误
#[derive(Debug)]
pub enum ScoringError {
    /// 评分调用失败
    CallFailed {
        page_index: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 评分服务返回错误响应
    BadResponse {
        page_index: usize,
        code: Option<u64>,
        message: Option<String>,
    },
    /// 页面没有预置评分结果（回放模式）
    MissingFixture { image_ref: String },
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringError::CallFailed { page_index, source } => {
                write!(f, "页面 {} 评分调用失败: {}", page_index, source)
            }
            ScoringError::BadResponse {
                page_index,
                code,
                message,
            } => {
                write!(
                    f,
                    "页面 {} 评分返回错误响应: code={:?}, message={:?}",
                    page_index, code, message
                )
            }
            ScoringError::MissingFixture { image_ref } => {
                write!(f, "页面没有预置评分结果: {}", image_ref)
            }
        }
    }
}

impl std::error::Error for ScoringError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScoringError::CallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Input(InputError::MalformedPayload {
            reason: err.to_string(),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建未知工作流错误
    pub fn unknown_workflow(workflow: impl Into<String>) -> Self {
        AppError::Input(InputError::UnknownWorkflow {
            workflow: workflow.into(),
        })
    }

    /// 创建载荷格式错误
    pub fn malformed_payload(reason: impl Into<String>) -> Self {
        AppError::Input(InputError::MalformedPayload {
            reason: reason.into(),
        })
    }

    /// 创建运行不存在错误
    pub fn run_not_found(run_id: impl Into<String>) -> Self {
        AppError::Run(RunError::NotFound {
            run_id: run_id.into(),
        })
    }

    /// 创建非法状态转移错误
    pub fn illegal_transition(run_id: impl Into<String>, from: RunStatus, to: RunStatus) -> Self {
        AppError::Run(RunError::IllegalTransition {
            run_id: run_id.into(),
            from,
            to,
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
