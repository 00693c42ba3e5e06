//! 跨页合并与学生级汇总测试
//!
//! 覆盖跨页判定条件、满分取大不求和、评分点并集、评语拼接、
//! 去重优先级、排序确定性与重算幂等。

use batch_paper_grading::models::boundary::DetectionMethod;
use batch_paper_grading::models::{
    PageGradingResult, QuestionResult, ScoringPoint, StudentBoundary,
};
use batch_paper_grading::{aggregate, merge_cross_page};

fn question(id: &str, score: f64, max_score: f64, confidence: f64) -> QuestionResult {
    QuestionResult::new(id, score, max_score, confidence)
}

fn page_with(page_index: usize, questions: Vec<QuestionResult>) -> PageGradingResult {
    let mut page = PageGradingResult::new(page_index);
    page.questions = questions;
    page
}

fn boundary(student_key: &str, start_page: usize, end_page: usize) -> StudentBoundary {
    StudentBoundary {
        student_key: student_key.to_string(),
        start_page,
        end_page,
        confidence: 0.9,
        needs_confirmation: false,
        method: DetectionMethod::IdentityMarker,
    }
}

fn point(description: &str, awarded: f64, max: f64) -> ScoringPoint {
    ScoringPoint {
        description: description.to_string(),
        awarded,
        max,
    }
}

// ========== 跨页合并 ==========

#[test]
fn test_cross_page_merge_scenario() {
    // Q5 在页 4 标记"下一页继续"，页 5 再次出现：
    // 评分点 {A:2/2} 与 {B:3/5} 并集，满分取大值 5 而不是 7
    let mut q5_front = question("Q5", 2.0, 2.0, 0.9);
    q5_front.continues_on_next_page = true;
    q5_front.scoring_points = Some(vec![point("A", 2.0, 2.0)]);

    let mut q5_back = question("Q5", 3.0, 5.0, 0.7);
    q5_back.scoring_points = Some(vec![point("B", 3.0, 5.0)]);

    let pages = vec![
        // 故意乱序传入
        page_with(5, vec![q5_back]),
        page_with(4, vec![q5_front]),
    ];

    let merged = merge_cross_page(&pages);

    let front_page = merged.iter().find(|p| p.page_index == 4).expect("页 4");
    let back_page = merged.iter().find(|p| p.page_index == 5).expect("页 5");

    assert_eq!(front_page.questions.len(), 1);
    assert!(back_page.questions.is_empty(), "后半侧应被并入前半侧");

    let merged_q5 = &front_page.questions[0];
    assert_eq!(merged_q5.max_score, 5.0, "满分应取两侧较大值，不能求和");
    assert_eq!(merged_q5.score, 5.0, "评分点并集后得分 = 2 + 3");
    assert!(merged_q5.is_cross_page);
    assert_eq!(merged_q5.page_indices, vec![4, 5]);
    assert!((merged_q5.confidence - 0.8).abs() < 1e-9, "置信度取平均");

    let points = merged_q5.scoring_points.as_ref().expect("应保留评分点");
    assert_eq!(points.len(), 2);
}

#[test]
fn test_merge_discards_duplicate_scoring_points() {
    let mut front = question("3", 2.0, 4.0, 0.8);
    front.continues_on_next_page = true;
    front.scoring_points = Some(vec![point("要点一", 2.0, 2.0)]);

    let mut back = question("3", 3.0, 4.0, 0.8);
    back.scoring_points = Some(vec![point("要点一", 1.0, 2.0), point("要点二", 2.0, 2.0)]);

    let pages = vec![page_with(0, vec![front]), page_with(1, vec![back])];
    let merged = merge_cross_page(&pages);

    let q = &merged[0].questions[0];
    let points = q.scoring_points.as_ref().expect("评分点");
    // 后出现的同描述评分点被丢弃，保留前半侧的 2 分
    assert_eq!(points.len(), 2);
    assert_eq!(q.score, 4.0);
}

#[test]
fn test_merge_without_points_takes_larger_score() {
    let mut front = question("7", 1.0, 6.0, 0.8);
    front.continues_on_next_page = true;
    front.feedback = "前半部分思路正确".to_string();

    let mut back = question("7", 4.0, 6.0, 0.6);
    back.feedback = "后半部分计算完整".to_string();

    let pages = vec![page_with(2, vec![front]), page_with(3, vec![back])];
    let merged = merge_cross_page(&pages);

    let q = &merged[0].questions[0];
    assert_eq!(q.score, 4.0, "无评分点时取更完整的一侧");
    assert_eq!(q.max_score, 6.0);
    assert_eq!(q.feedback, "前半部分思路正确\n后半部分计算完整");
}

#[test]
fn test_no_merge_without_continues_flag() {
    // 同题号出现在相邻两页，但前一页没有"继续"标记：不算跨页
    let pages = vec![
        page_with(0, vec![question("2", 3.0, 5.0, 0.9)]),
        page_with(1, vec![question("2", 4.0, 5.0, 0.8)]),
    ];

    let merged = merge_cross_page(&pages);
    assert_eq!(merged[0].questions.len(), 1);
    assert_eq!(merged[1].questions.len(), 1);
    assert!(!merged[0].questions[0].is_cross_page);
}

#[test]
fn test_no_merge_across_non_adjacent_pages() {
    let mut front = question("2", 3.0, 5.0, 0.9);
    front.continues_on_next_page = true;

    // 页 4 与页 6 不相邻（页 5 缺失），不得合并
    let pages = vec![
        page_with(4, vec![front]),
        page_with(6, vec![question("2", 4.0, 5.0, 0.8)]),
    ];

    let merged = merge_cross_page(&pages);
    assert_eq!(merged[0].questions.len(), 1);
    assert_eq!(merged[1].questions.len(), 1);
    assert!(!merged[0].questions[0].is_cross_page);
}

#[test]
fn test_chained_merge_across_three_pages() {
    let mut first = question("9", 1.0, 3.0, 0.9);
    first.continues_on_next_page = true;
    let mut second = question("9", 2.0, 8.0, 0.8);
    second.continues_on_next_page = true;
    let third = question("9", 3.0, 8.0, 0.7);

    let pages = vec![
        page_with(0, vec![first]),
        page_with(1, vec![second]),
        page_with(2, vec![third]),
    ];

    let merged = merge_cross_page(&pages);
    let q = &merged[0].questions[0];
    assert!(q.is_cross_page);
    assert_eq!(q.page_indices, vec![0, 1, 2]);
    assert_eq!(q.max_score, 8.0);
    assert!(merged[1].questions.is_empty());
    assert!(merged[2].questions.is_empty());
}

// ========== 学生级汇总 ==========

#[test]
fn test_aggregate_dedup_prefers_cross_page_variant() {
    let mut cross = question("2", 5.0, 6.0, 0.5);
    cross.is_cross_page = true;
    let plain = question("2", 3.0, 6.0, 0.95);

    let pages = vec![page_with(0, vec![cross]), page_with(1, vec![plain])];
    let results = aggregate(&[boundary("Alice", 0, 1)], &pages);

    assert_eq!(results.len(), 1);
    let q = &results[0].questions[0];
    assert!(q.is_cross_page, "跨页合并产物优先于高置信度普通结果");
    assert_eq!(q.score, 5.0);
}

#[test]
fn test_aggregate_dedup_prefers_higher_confidence() {
    let low = question("4", 2.0, 5.0, 0.6);
    let high = question("4", 3.0, 5.0, 0.9);

    let pages = vec![page_with(0, vec![low]), page_with(1, vec![high])];
    let results = aggregate(&[boundary("Bob", 0, 1)], &pages);

    let q = &results[0].questions[0];
    assert_eq!(q.confidence, 0.9);
    assert_eq!(q.score, 3.0);
}

#[test]
fn test_aggregate_sorts_by_numeric_question_order() {
    let pages = vec![page_with(
        0,
        vec![
            question("10", 1.0, 2.0, 0.9),
            question("总评", 0.0, 0.0, 0.9),
            question("2", 1.0, 2.0, 0.9),
            question("一", 1.0, 2.0, 0.9),
        ],
    )];

    let results = aggregate(&[boundary("Alice", 0, 0)], &pages);
    let ids: Vec<&str> = results[0]
        .questions
        .iter()
        .map(|q| q.question_id.as_str())
        .collect();
    // 数值序优先，无法归一化的排在末尾
    assert_eq!(ids, vec!["一", "2", "10", "总评"]);
}

#[test]
fn test_aggregate_sums_deduplicated_totals() {
    let pages = vec![
        page_with(
            0,
            vec![question("1", 3.0, 5.0, 0.9), question("2", 2.0, 4.0, 0.9)],
        ),
        page_with(
            1,
            // 题 2 的重复低置信度结果不应计入总分
            vec![question("2", 1.0, 4.0, 0.5), question("3", 4.0, 6.0, 0.9)],
        ),
        // 边界之外的页被忽略
        page_with(5, vec![question("9", 9.0, 9.0, 0.9)]),
    ];

    let results = aggregate(&[boundary("Alice", 0, 1)], &pages);

    assert_eq!(results.len(), 1);
    let student = &results[0];
    assert_eq!(student.questions.len(), 3);
    assert_eq!(student.total_score, 3.0 + 2.0 + 4.0);
    assert_eq!(student.total_max_score, 5.0 + 4.0 + 6.0);
}

#[test]
fn test_aggregate_is_byte_identical_on_rerun() {
    let mut cross = question("5", 4.0, 6.0, 0.7);
    cross.is_cross_page = true;
    cross.page_indices = vec![1, 2];

    let pages = vec![
        page_with(2, vec![question("6", 2.0, 4.0, 0.8)]),
        page_with(0, vec![question("1", 3.0, 5.0, 0.9)]),
        page_with(1, vec![cross, question("2", 1.0, 3.0, 0.6)]),
    ];
    let boundaries = vec![boundary("Alice", 0, 1), boundary("Bob", 2, 2)];

    let first = aggregate(&boundaries, &pages);
    let second = aggregate(&boundaries, &pages);

    let first_json = serde_json::to_string(&first).expect("序列化失败");
    let second_json = serde_json::to_string(&second).expect("序列化失败");
    assert_eq!(first_json, second_json, "重算必须逐字节一致");
}

#[test]
fn test_page_results_accept_historical_field_names() {
    // 历史字段名 question_results / items 仍可反序列化
    let legacy: PageGradingResult = serde_json::from_value(serde_json::json!({
        "page_index": 0,
        "question_results": [
            { "question_id": "1", "score": 2.0, "max_score": 5.0, "confidence": 0.9 }
        ]
    }))
    .expect("旧字段名应可解析");
    assert_eq!(legacy.questions.len(), 1);

    let older: PageGradingResult = serde_json::from_value(serde_json::json!({
        "page_index": 1,
        "items": [
            { "question_id": "2", "score": 1.0, "max_score": 5.0, "confidence": 0.8 }
        ]
    }))
    .expect("更旧字段名应可解析");
    assert_eq!(older.questions.len(), 1);

    let results = aggregate(&[boundary("Alice", 0, 1)], &[legacy, older]);
    assert_eq!(results[0].questions.len(), 2);
}
