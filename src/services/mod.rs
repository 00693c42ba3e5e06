//! 业务能力层（Services Layer）
//!
//! 纯函数的算法能力，不做任何外部调用：
//!
//! - `numerals` - 题号归一化（数字、全角、中文数字、括号形式）
//! - `boundary_detector` - 学生边界检测（身份标记 / 题号循环两种策略）
//! - `question_merger` - 跨页题目合并
//! - `result_aggregator` - 学生级结果汇总
//!
//! 页面评分结果可能乱序到达，每个能力都显式按页下标排序，
//! 从不信任到达顺序。

pub mod boundary_detector;
pub mod numerals;
pub mod question_merger;
pub mod result_aggregator;

pub use boundary_detector::BoundaryDetector;
pub use numerals::normalize_question_number;
pub use question_merger::merge_cross_page;
pub use result_aggregator::aggregate;
