//! 学生边界与学生结果模型

use serde::{Deserialize, Serialize};

use crate::models::grading::QuestionResult;

/// 边界检测方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// 身份标记驱动
    IdentityMarker,
    /// 题号循环驱动
    QuestionCycle,
    /// 均匀切分兜底
    UniformFallback,
}

impl DetectionMethod {
    /// 获取方法标签
    pub fn tag(self) -> &'static str {
        match self {
            Self::IdentityMarker => "identity_marker",
            Self::QuestionCycle => "question_cycle",
            Self::UniformFallback => "uniform_fallback",
        }
    }
}

/// 学生边界：推断出的归属同一学生的连续页范围
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentBoundary {
    /// 学生键（识别出的姓名，或 "student_N"）
    pub student_key: String,
    /// 起始页（含）
    pub start_page: usize,
    /// 结束页（含），start_page <= end_page
    pub end_page: usize,
    /// 置信度，[0, 1]
    pub confidence: f64,
    /// 置信度低于阈值时为 true，需要人工确认
    pub needs_confirmation: bool,
    /// 检测方法标签
    pub method: DetectionMethod,
}

impl StudentBoundary {
    /// 边界覆盖的页数
    pub fn page_count(&self) -> usize {
        self.end_page - self.start_page + 1
    }

    /// 页下标是否落在边界内
    pub fn contains(&self, page_index: usize) -> bool {
        page_index >= self.start_page && page_index <= self.end_page
    }
}

/// 边界检测输出：边界列表 + 未归属页
///
/// 所有边界范围与未归属页的并集覆盖全部页、互不重叠。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectOutcome {
    pub boundaries: Vec<StudentBoundary>,
    pub unassigned_pages: Vec<usize>,
}

/// 学生级汇总结果
///
/// 派生视图：由边界加上其覆盖的页面结果重算得到，从不单独修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentResult {
    pub student_key: String,
    pub start_page: usize,
    pub end_page: usize,
    /// 去重后各题得分之和
    pub total_score: f64,
    /// 去重后各题满分之和
    pub total_max_score: f64,
    /// 去重、按题号排序后的题目列表
    pub questions: Vec<QuestionResult>,
}
