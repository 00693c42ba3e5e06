//! 学生边界检测测试
//!
//! 覆盖策略选择、身份标记驱动的非对称换人阈值、题号循环断点、
//! 均匀切分兜底、覆盖性不变量与题号归一化。

use std::collections::BTreeSet;

use batch_paper_grading::models::boundary::DetectionMethod;
use batch_paper_grading::models::{IdentityMarker, PageGradingResult, QuestionResult};
use batch_paper_grading::services::normalize_question_number;
use batch_paper_grading::BoundaryDetector;

const CONFIRM_THRESHOLD: f64 = 0.8;

fn detector() -> BoundaryDetector {
    BoundaryDetector::new(CONFIRM_THRESHOLD)
}

/// 构造带身份标记的页面
fn marked_page(page_index: usize, name: &str, confidence: f64) -> PageGradingResult {
    let mut page = PageGradingResult::new(page_index);
    page.identity_marker = Some(IdentityMarker {
        name: name.to_string(),
        confidence,
    });
    page
}

/// 构造带题号的页面
fn numbered_page(page_index: usize, question_ids: &[&str]) -> PageGradingResult {
    let mut page = PageGradingResult::new(page_index);
    page.questions = question_ids
        .iter()
        .map(|id| QuestionResult::new(*id, 2.0, 5.0, 0.9))
        .collect();
    page
}

/// 覆盖性不变量：边界范围与未归属页的并集等于全部页、互不重叠
fn assert_full_coverage(
    outcome: &batch_paper_grading::DetectOutcome,
    pages: &[PageGradingResult],
) {
    let mut covered = BTreeSet::new();
    for boundary in &outcome.boundaries {
        assert!(boundary.start_page <= boundary.end_page);
        for idx in boundary.start_page..=boundary.end_page {
            assert!(covered.insert(idx), "页 {} 被多个边界覆盖", idx);
        }
    }
    for &idx in &outcome.unassigned_pages {
        assert!(covered.insert(idx), "页 {} 既有归属又在未归属列表", idx);
    }

    let expected: BTreeSet<usize> = pages.iter().map(|p| p.page_index).collect();
    assert_eq!(covered, expected, "覆盖的页集合与输入不一致");
}

#[test]
fn test_identity_driven_scenario() {
    // 6 页，只有页 0 (Alice, 0.9) 和页 3 (Bob, 0.85) 带标记
    let pages = vec![
        marked_page(0, "Alice", 0.9),
        PageGradingResult::new(1),
        PageGradingResult::new(2),
        marked_page(3, "Bob", 0.85),
        PageGradingResult::new(4),
        PageGradingResult::new(5),
    ];

    let outcome = detector().detect(&pages);

    assert_eq!(outcome.boundaries.len(), 2);
    let alice = &outcome.boundaries[0];
    assert_eq!(alice.student_key, "Alice");
    assert_eq!((alice.start_page, alice.end_page), (0, 2));
    let bob = &outcome.boundaries[1];
    assert_eq!(bob.student_key, "Bob");
    assert_eq!((bob.start_page, bob.end_page), (3, 5));

    assert!(outcome.unassigned_pages.is_empty());
    assert_full_coverage(&outcome, &pages);
    for boundary in &outcome.boundaries {
        assert_eq!(boundary.method, DetectionMethod::IdentityMarker);
    }
}

#[test]
fn test_question_cycle_scenario() {
    // 10 页无标记，题号在页 3 和页 7 处回落
    let pages = vec![
        numbered_page(0, &["1"]),
        numbered_page(1, &["2"]),
        numbered_page(2, &["3"]),
        numbered_page(3, &["1"]),
        numbered_page(4, &["2"]),
        numbered_page(5, &["3"]),
        numbered_page(6, &["4"]),
        numbered_page(7, &["1"]),
        numbered_page(8, &["2"]),
        PageGradingResult::new(9),
    ];

    let outcome = detector().detect(&pages);

    let ranges: Vec<(usize, usize)> = outcome
        .boundaries
        .iter()
        .map(|b| (b.start_page, b.end_page))
        .collect();
    assert_eq!(ranges, vec![(0, 2), (3, 6), (7, 9)]);

    assert_full_coverage(&outcome, &pages);
    for boundary in &outcome.boundaries {
        assert_eq!(boundary.method, DetectionMethod::QuestionCycle);
    }
}

#[test]
fn test_strategy_selection_requires_marker_ratio() {
    // 10 页里只有 1 页带可信标记（10% < 20%），应落入题号循环策略
    let mut pages: Vec<PageGradingResult> = (0..10)
        .map(|idx| numbered_page(idx, &[&format!("{}", idx % 3 + 1)]))
        .collect();
    pages[0].identity_marker = Some(IdentityMarker {
        name: "Alice".to_string(),
        confidence: 0.95,
    });

    let outcome = detector().detect(&pages);
    assert!(outcome
        .boundaries
        .iter()
        .all(|b| b.method != DetectionMethod::IdentityMarker));
}

#[test]
fn test_asymmetric_switch_thresholds() {
    // 页 2 的 Bob (0.72) 出现时 Alice 只累积了 2 页：单页噪声，不换人
    // 页 4 的 Carol (0.85) 达到无条件阈值：立即换人
    let pages = vec![
        marked_page(0, "Alice", 0.9),
        PageGradingResult::new(1),
        marked_page(2, "Bob", 0.72),
        PageGradingResult::new(3),
        marked_page(4, "Carol", 0.85),
        PageGradingResult::new(5),
    ];

    let outcome = detector().detect(&pages);

    let keys: Vec<&str> = outcome
        .boundaries
        .iter()
        .map(|b| b.student_key.as_str())
        .collect();
    assert_eq!(keys, vec!["Alice", "Carol"], "噪声标记不应打断当前学生");

    let ranges: Vec<(usize, usize)> = outcome
        .boundaries
        .iter()
        .map(|b| (b.start_page, b.end_page))
        .collect();
    assert_eq!(ranges, vec![(0, 3), (4, 5)]);
    assert_full_coverage(&outcome, &pages);
}

#[test]
fn test_switch_accepted_after_enough_pages() {
    // Bob (0.75) 在 Alice 已累积 3 页后出现：低阈值换人成立
    let pages = vec![
        marked_page(0, "Alice", 0.9),
        PageGradingResult::new(1),
        PageGradingResult::new(2),
        marked_page(3, "Bob", 0.75),
        PageGradingResult::new(4),
    ];

    let outcome = detector().detect(&pages);
    let keys: Vec<&str> = outcome
        .boundaries
        .iter()
        .map(|b| b.student_key.as_str())
        .collect();
    assert_eq!(keys, vec!["Alice", "Bob"]);
}

#[test]
fn test_leading_unmarked_pages_are_unassigned() {
    let pages = vec![
        PageGradingResult::new(0),
        PageGradingResult::new(1),
        marked_page(2, "Alice", 0.9),
        PageGradingResult::new(3),
        marked_page(4, "Bob", 0.9),
        PageGradingResult::new(5),
    ];

    let outcome = detector().detect(&pages);

    assert_eq!(outcome.unassigned_pages, vec![0, 1]);
    assert_full_coverage(&outcome, &pages);
}

#[test]
fn test_uniform_fallback_when_no_reset_found() {
    // 每页题号都是 [1, 2]，找不到断点；题号总量 12 远超最大题号 2，
    // 按估计学生数均匀切分
    let pages: Vec<PageGradingResult> =
        (0..6).map(|idx| numbered_page(idx, &["1", "2"])).collect();

    let outcome = detector().detect(&pages);

    assert!(outcome.boundaries.len() > 1, "应切分出多个学生");
    for boundary in &outcome.boundaries {
        assert_eq!(boundary.method, DetectionMethod::UniformFallback);
        assert!(boundary.needs_confirmation, "兜底切分必须标记待确认");
    }
    assert_full_coverage(&outcome, &pages);
}

#[test]
fn test_single_student_without_reset_keeps_one_boundary() {
    // 题号一路递增，没有回落也不满足兜底条件：整卷归一个学生
    let pages = vec![
        numbered_page(0, &["1", "2"]),
        numbered_page(1, &["3", "4"]),
        numbered_page(2, &["5", "6"]),
        numbered_page(3, &["7", "8"]),
    ];

    let outcome = detector().detect(&pages);

    assert_eq!(outcome.boundaries.len(), 1);
    let boundary = &outcome.boundaries[0];
    assert_eq!((boundary.start_page, boundary.end_page), (0, 3));
    assert_eq!(boundary.method, DetectionMethod::QuestionCycle);
}

#[test]
fn test_detection_tolerates_unsorted_input() {
    let mut pages = vec![
        marked_page(0, "Alice", 0.9),
        PageGradingResult::new(1),
        PageGradingResult::new(2),
        marked_page(3, "Bob", 0.85),
        PageGradingResult::new(4),
        PageGradingResult::new(5),
    ];
    // 模拟评分结果乱序到达
    pages.reverse();

    let outcome = detector().detect(&pages);
    let ranges: Vec<(usize, usize)> = outcome
        .boundaries
        .iter()
        .map(|b| (b.start_page, b.end_page))
        .collect();
    assert_eq!(ranges, vec![(0, 2), (3, 5)]);
}

#[test]
fn test_confidence_bounds_and_confirmation_flag() {
    let fixtures: Vec<Vec<PageGradingResult>> = vec![
        vec![
            marked_page(0, "Alice", 0.9),
            PageGradingResult::new(1),
            marked_page(2, "Bob", 0.95),
            PageGradingResult::new(3),
        ],
        (0..8)
            .map(|idx| numbered_page(idx, &[&format!("{}", idx % 4 + 1)]))
            .collect(),
        (0..6).map(|idx| numbered_page(idx, &["1", "2"])).collect(),
    ];

    for pages in fixtures {
        let outcome = detector().detect(&pages);
        for boundary in &outcome.boundaries {
            assert!(
                (0.0..=1.0).contains(&boundary.confidence),
                "置信度 {} 越界",
                boundary.confidence
            );
            if boundary.method != DetectionMethod::UniformFallback {
                assert_eq!(
                    boundary.needs_confirmation,
                    boundary.confidence < CONFIRM_THRESHOLD,
                    "needs_confirmation 与阈值不一致"
                );
            } else {
                assert!(boundary.needs_confirmation);
            }
        }
    }
}

#[test]
fn test_empty_input_yields_empty_outcome() {
    let outcome = detector().detect(&[]);
    assert!(outcome.boundaries.is_empty());
    assert!(outcome.unassigned_pages.is_empty());
}

// ========== 题号归一化 ==========

#[test]
fn test_normalize_plain_and_suffixed_numbers() {
    assert_eq!(normalize_question_number("5"), Some(5));
    assert_eq!(normalize_question_number("5."), Some(5));
    assert_eq!(normalize_question_number("3、"), Some(3));
    assert_eq!(normalize_question_number("12)"), Some(12));
    assert_eq!(normalize_question_number("(12)"), Some(12));
    assert_eq!(normalize_question_number("（7）"), Some(7));
    assert_eq!(normalize_question_number("【3】"), Some(3));
    assert_eq!(normalize_question_number("[4]"), Some(4));
}

#[test]
fn test_normalize_prefixed_forms() {
    assert_eq!(normalize_question_number("Q5"), Some(5));
    assert_eq!(normalize_question_number("q6"), Some(6));
    assert_eq!(normalize_question_number("No.8"), Some(8));
    assert_eq!(normalize_question_number("第9题"), Some(9));
    assert_eq!(normalize_question_number("  10"), Some(10));
}

#[test]
fn test_normalize_localized_numerals() {
    assert_eq!(normalize_question_number("一、"), Some(1));
    assert_eq!(normalize_question_number("五"), Some(5));
    assert_eq!(normalize_question_number("十"), Some(10));
    assert_eq!(normalize_question_number("十五、"), Some(15));
    assert_eq!(normalize_question_number("二十"), Some(20));
    assert_eq!(normalize_question_number("二十三"), Some(23));
    assert_eq!(normalize_question_number("第五题"), Some(5));
    // 全角数字
    assert_eq!(normalize_question_number("１２"), Some(12));
}

#[test]
fn test_normalize_rejects_non_numbers() {
    assert_eq!(normalize_question_number(""), None);
    assert_eq!(normalize_question_number("总评"), None);
    assert_eq!(normalize_question_number("essay"), None);
}
