//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行的全生命周期管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `registry` - 运行注册表与状态机
//! - 幂等创建、状态机合法转移、ID 分配
//!
//! ### `governor` - 并发调速器
//! - 全局运行并发上限（信号量排队）
//! - 单运行评分并发上限（按工作流可配）
//!
//! ### `event_bus` - 事件总线
//! - 每运行一条有序只追加事件队列（单写多读）
//! - 持久日志补读 + 实时分发，流结束标记只在真终态追加
//!
//! ### `driver` - 执行驱动器
//! - 逐阶段推进、增量合并、检查点、双路挂起检测
//!
//! ### `engine` - 引擎门面
//! - 对外操作：start_run / get_status / get_state / stream_run /
//!   cancel / retry / send_event
//!
//! ### `batch_processor` - 批量阅卷处理器
//! - 离线批量模式入口，按试卷提交运行并消费事件流
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<PaperFixture>)
//!     ↓
//! engine / driver (处理单个 Run)
//!     ↓
//! workflow::Stage (处理单个阶段)
//!     ↓
//! services (能力层：detect / merge / aggregate)
//!     ↓
//! infrastructure (基础设施：RunStore / PageScorer)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：registry 管记录，governor 管并发，driver 管推进
//! 2. **独占写入**：运行执行期间累积状态只属于自己的驱动任务
//! 3. **抽象注入**：存储与评分服务都是注入的 trait 对象
//! 4. **无业务逻辑**：只做调度、合并与统计，不做阅卷判断

pub mod batch_processor;
pub mod driver;
pub mod engine;
pub mod event_bus;
pub mod governor;
pub mod registry;

// 重新导出主要类型
pub use batch_processor::App;
pub use driver::apply_deltas;
pub use engine::{GradingEngine, RunProgress, StatusReport};
pub use event_bus::{EventBus, RunEventStream};
pub use governor::Governor;
pub use registry::{CreateOutcome, RunRegistry};
