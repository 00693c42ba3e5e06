//! 跨页题目合并 - 业务能力层
//!
//! 同一道题写满一页后翻页继续作答时，评分服务会在相邻两页各产出
//! 一条同题号的结果。只有前一页显式标记"下一页继续"时才认定跨页，
//! 合并时满分取两侧较大值而不是求和，避免题目权重被重复计算。

use tracing::debug;

use crate::models::grading::{PageGradingResult, QuestionResult, ScoringPoint};

/// 合并相邻页的跨页题目
///
/// 输入允许乱序，内部按页下标排序。合并后的题目保留在较早的页上，
/// 较晚页上的那一侧被移除。相邻页对从后往前处理：链尾先并入中间页，
/// 再整体并入链头，三页以上的链式跨页同样成立。
pub fn merge_cross_page(pages: &[PageGradingResult]) -> Vec<PageGradingResult> {
    let mut sorted: Vec<PageGradingResult> = pages.to_vec();
    sorted.sort_by_key(|p| p.page_index);

    for pos in (0..sorted.len().saturating_sub(1)).rev() {
        // 只认相邻页下标（中间缺页则不合并）
        if sorted[pos + 1].page_index != sorted[pos].page_index + 1 {
            continue;
        }

        let earlier_index = sorted[pos].page_index;
        let later_index = sorted[pos + 1].page_index;

        let continuing: Vec<String> = sorted[pos]
            .questions
            .iter()
            .filter(|q| q.continues_on_next_page)
            .map(|q| q.question_id.clone())
            .collect();

        for question_id in continuing {
            let Some(later_pos) = sorted[pos + 1]
                .questions
                .iter()
                .position(|q| q.question_id == question_id)
            else {
                continue;
            };

            let later_side = sorted[pos + 1].questions.remove(later_pos);
            let earlier_side = sorted[pos]
                .questions
                .iter_mut()
                .find(|q| q.question_id == question_id)
                .expect("前一页必有该题");

            debug!(
                "🔗 合并跨页题目 {} (页 {} + 页 {})",
                question_id, earlier_index, later_index
            );

            *earlier_side = merge_question_pair(
                earlier_side,
                &later_side,
                earlier_index,
                later_index,
            );
        }
    }

    sorted
}

/// 合并一对跨页题目结果
fn merge_question_pair(
    earlier: &QuestionResult,
    later: &QuestionResult,
    earlier_page: usize,
    later_page: usize,
) -> QuestionResult {
    // 满分取较大一侧，绝不求和
    let max_score = earlier.max_score.max(later.max_score);

    // 两侧都有评分点明细时按描述并集重算得分，否则取更完整的一侧
    let (score, scoring_points) = match (&earlier.scoring_points, &later.scoring_points) {
        (Some(a), Some(b)) => {
            let merged = union_scoring_points(a, b);
            let score: f64 = merged.iter().map(|p| p.awarded).sum();
            (score, Some(merged))
        }
        _ => {
            let score = earlier.score.max(later.score);
            let points = earlier
                .scoring_points
                .clone()
                .or_else(|| later.scoring_points.clone());
            (score, points)
        }
    };

    // 评语不同则拼接
    let feedback = if later.feedback.is_empty() || later.feedback == earlier.feedback {
        earlier.feedback.clone()
    } else if earlier.feedback.is_empty() {
        later.feedback.clone()
    } else {
        format!("{}\n{}", earlier.feedback, later.feedback)
    };

    // 页下标与来源标签取并集
    let mut page_indices = earlier.page_indices.clone();
    for idx in [earlier_page, later_page]
        .into_iter()
        .chain(later.page_indices.iter().copied())
    {
        if !page_indices.contains(&idx) {
            page_indices.push(idx);
        }
    }
    page_indices.sort_unstable();

    let mut merge_tags = earlier.merge_tags.clone();
    for tag in &later.merge_tags {
        if !merge_tags.contains(tag) {
            merge_tags.push(tag.clone());
        }
    }

    QuestionResult {
        question_id: earlier.question_id.clone(),
        score,
        max_score,
        confidence: (earlier.confidence + later.confidence) / 2.0,
        feedback,
        page_indices,
        merge_tags,
        is_cross_page: true,
        // 继续标记取后半侧的值：链尾并入后整条链即告完结
        continues_on_next_page: later.continues_on_next_page,
        scoring_points,
    }
}

/// 按描述并集合并评分点，后出现的重复描述被丢弃
fn union_scoring_points(earlier: &[ScoringPoint], later: &[ScoringPoint]) -> Vec<ScoringPoint> {
    let mut merged: Vec<ScoringPoint> = earlier.to_vec();
    for point in later {
        if !merged.iter().any(|p| p.description == point.description) {
            merged.push(point.clone());
        }
    }
    merged
}
