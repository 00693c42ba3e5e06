//! 学生级结果汇总 - 业务能力层
//!
//! 对每个学生边界，收集范围内全部页面的题目结果，去重、排序、求和。
//! 必须幂等：同样的输入重复执行，输出逐字节一致（包括顺序）。

use crate::models::boundary::{StudentBoundary, StudentResult};
use crate::models::grading::{PageGradingResult, QuestionResult};
use crate::services::numerals::normalize_question_number;

/// 按学生边界汇总评分结果
///
/// 去重规则：同题号优先保留跨页合并产物，其次保留置信度更高的，
/// 再次保留页序更靠前的。排序按归一化题号升序，无法归一化的
/// 排在末尾并按原始题号字典序决定先后，全部显式可重放。
pub fn aggregate(
    boundaries: &[StudentBoundary],
    pages: &[PageGradingResult],
) -> Vec<StudentResult> {
    let mut sorted_pages: Vec<&PageGradingResult> = pages.iter().collect();
    sorted_pages.sort_by_key(|p| p.page_index);

    boundaries
        .iter()
        .map(|boundary| aggregate_one(boundary, &sorted_pages))
        .collect()
}

fn aggregate_one(boundary: &StudentBoundary, sorted_pages: &[&PageGradingResult]) -> StudentResult {
    // 按页序收集边界内全部题目
    let mut deduplicated: Vec<QuestionResult> = Vec::new();

    for page in sorted_pages
        .iter()
        .filter(|p| boundary.contains(p.page_index))
    {
        for question in &page.questions {
            match deduplicated
                .iter_mut()
                .find(|q| q.question_id == question.question_id)
            {
                Some(existing) => {
                    if prefer_candidate(existing, question) {
                        *existing = question.clone();
                    }
                }
                None => deduplicated.push(question.clone()),
            }
        }
    }

    deduplicated.sort_by(|a, b| question_sort_key(a).cmp(&question_sort_key(b)));

    let total_score: f64 = deduplicated.iter().map(|q| q.score).sum();
    let total_max_score: f64 = deduplicated.iter().map(|q| q.max_score).sum();

    StudentResult {
        student_key: boundary.student_key.clone(),
        start_page: boundary.start_page,
        end_page: boundary.end_page,
        total_score,
        total_max_score,
        questions: deduplicated,
    }
}

/// 同题号去重时是否用候选替换已保留的一条
fn prefer_candidate(existing: &QuestionResult, candidate: &QuestionResult) -> bool {
    if existing.is_cross_page != candidate.is_cross_page {
        return candidate.is_cross_page;
    }
    // 置信度持平时保留页序靠前的一条
    candidate.confidence > existing.confidence
}

/// 确定性的题目排序键：(能否归一化, 题号, 原始题号)
fn question_sort_key(question: &QuestionResult) -> (u8, u32, String) {
    match normalize_question_number(&question.question_id) {
        Some(n) => (0, n, question.question_id.clone()),
        None => (1, 0, question.question_id.clone()),
    }
}
