//! 学生边界检测 - 业务能力层
//!
//! ## 职责
//!
//! 从按页的评分结果里推断"哪些连续页属于同一个学生"。
//!
//! ## 策略选择
//!
//! 1. **身份标记驱动**：至少 20% 的页面带有置信度 ≥0.6 的身份标记时使用。
//!    顺序扫描并跟踪当前学生；换人采用非对称阈值：新标记置信度 ≥0.7 且
//!    当前学生已累积 ≥3 页，或置信度 ≥0.8 直接换人。单页误读不足以
//!    打断当前学生，强信号则立即生效。无标记的页向前归入当前学生。
//! 2. **题号循环驱动**：题号归一化后，在"题号回落"处断开。
//!    兜底：完全找不到断点、而全卷题号总量明显超过最大题号时，
//!    按估计的学生数均匀切分，置信度最低，一律标记需人工确认。
//!
//! ## 置信度
//!
//! 三个独立子分的平均值：起始页标记置信度（缺失记 0.5）、
//! 边界内题号连续性（相邻题号差恰为 1 的比例）、
//! 边界起始页相对前一页的标记区分度。

use tracing::{debug, info};

use crate::models::boundary::{DetectOutcome, DetectionMethod, StudentBoundary};
use crate::models::grading::PageGradingResult;
use crate::services::numerals::normalize_question_number;

/// 触发身份标记策略所需的标记页面比例
const IDENTITY_STRATEGY_MARKER_RATIO: f64 = 0.2;
/// 参与策略选择和开启学生的标记置信度下限
const IDENTITY_MARKER_MIN_CONFIDENCE: f64 = 0.6;
/// 已累积足够页数时的换人置信度阈值
const SWITCH_CONFIDENCE_WITH_PAGES: f64 = 0.7;
/// 换人低阈值生效所需的当前学生累积页数
const SWITCH_MIN_PAGES: usize = 3;
/// 无条件换人的置信度阈值
const SWITCH_CONFIDENCE_IMMEDIATE: f64 = 0.8;

/// 题号回落断点生效所需的全卷页深度
const CYCLE_RESET_MIN_DEPTH: usize = 3;
/// 强断点：段内最大题号达到该值后回落到 ≤2
const CYCLE_STRONG_MAX: u32 = 5;
/// 回落断点判定的题号下限
const CYCLE_RESET_MIN: u32 = 2;
/// 弱断点：段内最大题号达到该值后出现大幅回落
const CYCLE_HIGH_MAX: u32 = 8;
/// 弱断点的回落幅度
const CYCLE_HIGH_DROP: u32 = 4;
/// 均匀切分兜底：题号总量相对最大题号的倍数下限
const FALLBACK_SPAN_RATIO: f64 = 1.5;

/// 边界检测策略
///
/// 两种策略各自独立可测，由上层分类器选择。
pub trait BoundaryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 检测边界（输入已按页下标排序）
    fn detect(&self, pages: &[PageGradingResult]) -> DetectOutcome;
}

/// 学生边界检测器
pub struct BoundaryDetector {
    /// 低于该置信度的边界标记为需人工确认
    confirm_threshold: f64,
}

impl BoundaryDetector {
    /// 创建新的边界检测器
    pub fn new(confirm_threshold: f64) -> Self {
        Self { confirm_threshold }
    }

    /// 检测学生边界
    ///
    /// 输入允许乱序，内部先按页下标排序；
    /// 输出的边界范围与未归属页并集覆盖全部页、互不重叠。
    pub fn detect(&self, pages: &[PageGradingResult]) -> DetectOutcome {
        if pages.is_empty() {
            return DetectOutcome::default();
        }

        let mut sorted: Vec<PageGradingResult> = pages.to_vec();
        sorted.sort_by_key(|p| p.page_index);

        let strategy: Box<dyn BoundaryStrategy> = if identity_marker_ratio(&sorted)
            >= IDENTITY_STRATEGY_MARKER_RATIO
        {
            Box::new(IdentityDrivenStrategy)
        } else {
            Box::new(QuestionCycleStrategy)
        };

        info!("🔍 边界检测策略: {}", strategy.name());

        let mut outcome = strategy.detect(&sorted);
        self.score_boundaries(&mut outcome.boundaries, &sorted);
        outcome
    }

    /// 计算每个边界的置信度并标记是否需人工确认
    fn score_boundaries(&self, boundaries: &mut [StudentBoundary], sorted: &[PageGradingResult]) {
        for boundary in boundaries.iter_mut() {
            let marker_score = marker_confidence_score(boundary, sorted);
            let continuity_score = continuity_score(boundary, sorted);
            let edge_score = edge_clarity_score(boundary, sorted);

            let confidence = (marker_score + continuity_score + edge_score) / 3.0;
            boundary.confidence = confidence.clamp(0.0, 1.0);
            boundary.needs_confirmation = boundary.confidence < self.confirm_threshold
                || boundary.method == DetectionMethod::UniformFallback;

            debug!(
                "边界 {} [{}-{}]: 标记 {:.2} / 连续性 {:.2} / 区分度 {:.2} → {:.2}",
                boundary.student_key,
                boundary.start_page,
                boundary.end_page,
                marker_score,
                continuity_score,
                edge_score,
                boundary.confidence
            );
        }
    }
}

/// 带可信身份标记的页面比例
fn identity_marker_ratio(sorted: &[PageGradingResult]) -> f64 {
    let marked = sorted
        .iter()
        .filter(|p| {
            p.identity_marker
                .as_ref()
                .is_some_and(|m| m.confidence >= IDENTITY_MARKER_MIN_CONFIDENCE)
        })
        .count();
    marked as f64 / sorted.len() as f64
}

// ========== 身份标记驱动策略 ==========

/// 身份标记驱动：顺序扫描，跟踪当前学生
pub struct IdentityDrivenStrategy;

impl BoundaryStrategy for IdentityDrivenStrategy {
    fn name(&self) -> &'static str {
        "identity_marker"
    }

    fn detect(&self, pages: &[PageGradingResult]) -> DetectOutcome {
        let mut boundaries = Vec::new();
        let mut unassigned_pages = Vec::new();

        // 当前学生：(姓名, 起始位置)
        let mut current: Option<(String, usize)> = None;

        for (pos, page) in pages.iter().enumerate() {
            let marker = page.identity_marker.as_ref();

            // 先判定是否换人，再统一修改状态
            let switch = match (&current, marker) {
                (Some((name, start_pos)), Some(m)) if m.name != *name => {
                    let held_pages = pos - start_pos;
                    let accept = m.confidence >= SWITCH_CONFIDENCE_IMMEDIATE
                        || (m.confidence >= SWITCH_CONFIDENCE_WITH_PAGES
                            && held_pages >= SWITCH_MIN_PAGES);
                    if !accept {
                        debug!(
                            "忽略疑似误读的标记 {} (置信度 {:.2}, 当前学生仅 {} 页)",
                            m.name, m.confidence, held_pages
                        );
                    }
                    accept
                }
                _ => false,
            };

            if switch {
                let (name, start_pos) = current.take().expect("已判定有当前学生");
                boundaries.push(make_boundary(
                    name,
                    pages,
                    start_pos,
                    pos - 1,
                    DetectionMethod::IdentityMarker,
                ));
                let m = marker.expect("已判定有标记");
                current = Some((m.name.clone(), pos));
            } else if current.is_none() {
                match marker {
                    Some(m) if m.confidence >= IDENTITY_MARKER_MIN_CONFIDENCE => {
                        current = Some((m.name.clone(), pos));
                    }
                    // 第一个可信标记之前的页无法归属
                    _ => unassigned_pages.push(page.page_index),
                }
            }
            // 其余情况：无标记或同名标记，向前归入当前学生
        }

        if let Some((name, start_pos)) = current {
            boundaries.push(make_boundary(
                name,
                pages,
                start_pos,
                pages.len() - 1,
                DetectionMethod::IdentityMarker,
            ));
        }

        DetectOutcome {
            boundaries,
            unassigned_pages,
        }
    }
}

// ========== 题号循环驱动策略 ==========

/// 题号循环驱动：题号回落即换人
pub struct QuestionCycleStrategy;

impl BoundaryStrategy for QuestionCycleStrategy {
    fn name(&self) -> &'static str {
        "question_cycle"
    }

    fn detect(&self, pages: &[PageGradingResult]) -> DetectOutcome {
        let numbers_per_page: Vec<Vec<u32>> = pages.iter().map(page_question_numbers).collect();

        let mut segment_starts: Vec<usize> = vec![0];
        let mut segment_max: u32 = 0;
        let mut segment_question_count: usize = 0;

        for (pos, numbers) in numbers_per_page.iter().enumerate() {
            if numbers.is_empty() {
                continue;
            }
            let page_min = *numbers.iter().min().expect("非空");
            let page_max = *numbers.iter().max().expect("非空");
            let segment_start = *segment_starts.last().expect("至少有一段");
            let segment_pages = pos - segment_start;

            if pos >= CYCLE_RESET_MIN_DEPTH && segment_pages >= 1 {
                if is_cycle_reset(
                    page_min,
                    numbers.len(),
                    segment_max,
                    segment_question_count,
                    segment_pages,
                ) {
                    segment_starts.push(pos);
                    segment_max = page_max;
                    segment_question_count = numbers.len();
                    continue;
                }
            }

            segment_max = segment_max.max(page_max);
            segment_question_count += numbers.len();
        }

        if segment_starts.len() == 1 {
            // 没有找到任何断点，考虑均匀切分兜底
            if let Some(outcome) = uniform_fallback(pages, &numbers_per_page) {
                return outcome;
            }
        }

        let mut boundaries = Vec::new();
        for (idx, &start_pos) in segment_starts.iter().enumerate() {
            let end_pos = segment_starts
                .get(idx + 1)
                .map(|&next| next - 1)
                .unwrap_or(pages.len() - 1);
            boundaries.push(make_boundary(
                format!("student_{}", idx + 1),
                pages,
                start_pos,
                end_pos,
                DetectionMethod::QuestionCycle,
            ));
        }

        DetectOutcome {
            boundaries,
            unassigned_pages: Vec::new(),
        }
    }
}

/// 断点判定
///
/// 强断点：最大题号 ≥5 后回落到 ≤2。
/// 次级断点：题号回落到 ≤2 且段内最大题号至少高出 2（覆盖短卷）。
/// 弱断点：最大题号 ≥8 后回落 ≥4；或题目密度骤增 ≥2 倍且题号回落。
fn is_cycle_reset(
    page_min: u32,
    page_count: usize,
    segment_max: u32,
    segment_question_count: usize,
    segment_pages: usize,
) -> bool {
    if segment_max == 0 {
        return false;
    }

    if page_min <= CYCLE_RESET_MIN && segment_max >= CYCLE_STRONG_MAX {
        return true;
    }

    if page_min <= CYCLE_RESET_MIN && segment_max >= page_min + 2 {
        return true;
    }

    if segment_max >= CYCLE_HIGH_MAX && page_min + CYCLE_HIGH_DROP <= segment_max {
        return true;
    }

    // 密度骤增 + 题号回落
    if segment_pages > 0 && page_min <= CYCLE_RESET_MIN && page_min < segment_max {
        let avg_density = segment_question_count as f64 / segment_pages as f64;
        if avg_density > 0.0 && page_count as f64 >= 2.0 * avg_density {
            return true;
        }
    }

    false
}

/// 均匀切分兜底
///
/// 题号总量明显超过最大题号说明卷面上混着多个学生，
/// 却找不到干净的断点，按估计学生数均分，整体标记待确认。
fn uniform_fallback(
    pages: &[PageGradingResult],
    numbers_per_page: &[Vec<u32>],
) -> Option<DetectOutcome> {
    let total_numbers: usize = numbers_per_page.iter().map(|n| n.len()).sum();
    let global_max = numbers_per_page
        .iter()
        .flat_map(|n| n.iter())
        .max()
        .copied()
        .unwrap_or(0);

    if pages.len() < 2 || global_max == 0 {
        return None;
    }
    if (total_numbers as f64) < FALLBACK_SPAN_RATIO * global_max as f64 {
        return None;
    }

    let estimated = ((total_numbers as f64 / global_max as f64).round() as usize)
        .clamp(2, pages.len());

    info!(
        "⚠️ 未找到题号断点，按估计学生数 {} 均匀切分（共 {} 页）",
        estimated,
        pages.len()
    );

    let mut boundaries = Vec::new();
    let base = pages.len() / estimated;
    let remainder = pages.len() % estimated;
    let mut pos = 0;
    for idx in 0..estimated {
        let chunk = base + usize::from(idx < remainder);
        if chunk == 0 {
            break;
        }
        boundaries.push(make_boundary(
            format!("student_{}", idx + 1),
            pages,
            pos,
            pos + chunk - 1,
            DetectionMethod::UniformFallback,
        ));
        pos += chunk;
    }

    Some(DetectOutcome {
        boundaries,
        unassigned_pages: Vec::new(),
    })
}

// ========== 公共辅助 ==========

/// 由排序位置区间构造边界（置信度稍后统一计算）
fn make_boundary(
    student_key: String,
    pages: &[PageGradingResult],
    start_pos: usize,
    end_pos: usize,
    method: DetectionMethod,
) -> StudentBoundary {
    StudentBoundary {
        student_key,
        start_page: pages[start_pos].page_index,
        end_page: pages[end_pos].page_index,
        confidence: 0.0,
        needs_confirmation: true,
        method,
    }
}

/// 页面上归一化后的题号列表
fn page_question_numbers(page: &PageGradingResult) -> Vec<u32> {
    page.questions
        .iter()
        .filter_map(|q| normalize_question_number(&q.question_id))
        .collect()
}

/// 子分 1：起始页标记置信度，缺失记 0.5
fn marker_confidence_score(boundary: &StudentBoundary, sorted: &[PageGradingResult]) -> f64 {
    sorted
        .iter()
        .find(|p| p.page_index == boundary.start_page)
        .and_then(|p| p.identity_marker.as_ref())
        .map(|m| m.confidence)
        .unwrap_or(0.5)
}

/// 子分 2：边界内题号连续性（相邻差恰为 1 的比例；证据不足记 0.5）
fn continuity_score(boundary: &StudentBoundary, sorted: &[PageGradingResult]) -> f64 {
    let numbers: Vec<u32> = sorted
        .iter()
        .filter(|p| boundary.contains(p.page_index))
        .flat_map(page_question_numbers)
        .collect();

    if numbers.len() < 2 {
        return 0.5;
    }

    let adjacent = numbers.windows(2).filter(|w| w[1] == w[0] + 1).count();
    adjacent as f64 / (numbers.len() - 1) as f64
}

/// 子分 3：边界起始页相对前一页的标记区分度
fn edge_clarity_score(boundary: &StudentBoundary, sorted: &[PageGradingResult]) -> f64 {
    let start_pos = sorted
        .iter()
        .position(|p| p.page_index == boundary.start_page);
    let Some(start_pos) = start_pos else {
        return 0.0;
    };

    let marker = sorted[start_pos].identity_marker.as_ref();
    let Some(marker) = marker else {
        return 0.0;
    };

    let prev_marker = start_pos
        .checked_sub(1)
        .and_then(|p| sorted[p].identity_marker.as_ref());

    match prev_marker {
        Some(prev) if prev.name == marker.name => 0.5,
        _ => 1.0,
    }
}
