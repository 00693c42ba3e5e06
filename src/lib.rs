//! # Batch Paper Grading
//!
//! 一个把整摞扫描试卷页变成按学生、按题目评分结果的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源抽象，只暴露能力
//! - `RunStore` - 运行记录 / 事件日志 / 检查点的存储抽象
//! - `PageScorer` - 不透明的按页评分服务抽象
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，纯函数、无外部调用
//! - `BoundaryDetector` - 学生边界检测能力（两种策略）
//! - `merge_cross_page` - 跨页题目合并能力
//! - `aggregate` - 学生级汇总能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次运行"的完整阶段序列
//! - `StageCtx` - 阶段上下文（运行ID + 输入 + 共享能力）
//! - `batch_grading_workflow` - 阶段编排（prepare → grade →
//!   review → merge → detect → aggregate）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/engine` - 引擎门面，运行全生命周期操作
//! - `orchestrator/driver` - 逐阶段推进、检查点、双路挂起检测
//! - `orchestrator/batch_processor` - 批量试卷处理器
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{MemoryRunStore, PageScorer, RunStore, ScriptedScorer};
pub use models::{
    DetectOutcome, PageGradingResult, PaperFixture, QuestionResult, Run, RunEvent, RunStatus,
    StudentBoundary, StudentResult,
};
pub use orchestrator::{App, GradingEngine, StatusReport};
pub use services::{aggregate, merge_cross_page, BoundaryDetector};
pub use workflow::{batch_grading_workflow, Workflow, BATCH_GRADING_WORKFLOW};
