//! 批量阅卷流程 - 流程层
//!
//! 核心职责：定义"一次阅卷运行"的完整阶段序列
//!
//! 阶段顺序：
//! 1. prepare_pages → 校验输入、记录页数
//! 2. grade_pages → 按页并发外呼评分服务（乱序追加）
//! 3. review_gate → 低置信度结果挂起等待人工复核
//! 4. merge_cross_page → 合并跨页题目
//! 5. detect_boundaries → 推断学生边界
//! 6. aggregate_results → 学生级汇总

use std::collections::HashSet;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::models::boundary::StudentBoundary;
use crate::models::grading::{PageGradingResult, PageSpec};
use crate::models::run::StateMap;
use crate::services::boundary_detector::BoundaryDetector;
use crate::services::question_merger::merge_cross_page;
use crate::services::result_aggregator::aggregate;
use crate::workflow::stage::{
    InterruptRequest, Stage, StageCtx, StageOutcome, StateDelta, Workflow,
};

/// 批量阅卷工作流名称
pub const BATCH_GRADING_WORKFLOW: &str = "batch_grading";

/// 组装批量阅卷工作流
pub fn batch_grading_workflow(config: &Config) -> Workflow {
    Workflow {
        name: BATCH_GRADING_WORKFLOW.to_string(),
        stages: vec![
            std::sync::Arc::new(PreparePagesStage),
            std::sync::Arc::new(GradePagesStage),
            std::sync::Arc::new(ReviewGateStage {
                review_threshold: config.review_confidence_threshold,
            }),
            std::sync::Arc::new(MergeQuestionsStage),
            std::sync::Arc::new(DetectBoundariesStage {
                confirm_threshold: config.confirm_threshold,
            }),
            std::sync::Arc::new(AggregateStage),
        ],
        grading_concurrency: None,
        validate_input: Some(validate_batch_payload),
    }
}

/// 批量阅卷载荷校验（同步执行，失败不创建运行）
fn validate_batch_payload(payload: &JsonValue) -> Result<()> {
    let pages = payload
        .get("pages")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AppError::malformed_payload("缺少 pages 数组"))?;

    if pages.is_empty() {
        return Err(AppError::malformed_payload("pages 不能为空").into());
    }

    for (idx, page) in pages.iter().enumerate() {
        if page.get("page_index").and_then(|v| v.as_u64()).is_none() {
            return Err(
                AppError::malformed_payload(format!("pages[{}] 缺少 page_index", idx)).into(),
            );
        }
        if page.get("image_ref").and_then(|v| v.as_str()).is_none() {
            return Err(
                AppError::malformed_payload(format!("pages[{}] 缺少 image_ref", idx)).into(),
            );
        }
    }

    Ok(())
}

// ========== 状态字段读取辅助 ==========

/// 从输入载荷解析页面描述列表
fn page_specs_from_input(input: &JsonValue) -> Result<Vec<PageSpec>> {
    let pages = input
        .get("pages")
        .cloned()
        .unwrap_or(JsonValue::Array(Vec::new()));
    serde_json::from_value(pages).context("无法解析输入里的页面描述列表")
}

/// 从累积状态读取页面评分结果列表（字段缺失视为空）
fn pages_from_state(state: &StateMap, field: &str) -> Result<Vec<PageGradingResult>> {
    match state.get(field) {
        Some(value) => serde_json::from_value(value.clone())
            .with_context(|| format!("无法解析状态字段 {}", field)),
        None => Ok(Vec::new()),
    }
}

// ========== 阶段 1: 准备 ==========

/// 准备阶段：校验输入、记录页数
pub struct PreparePagesStage;

impl Stage for PreparePagesStage {
    fn name(&self) -> &'static str {
        "prepare_pages"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        _state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            let specs = page_specs_from_input(&ctx.input)?;
            info!("[运行 {}] 📄 共 {} 页待评分", ctx.run_id, specs.len());

            let mut deltas = vec![StateDelta::overwrite("total_pages", json!(specs.len()))];
            if let Some(paper_name) = ctx.input.get("paper_name") {
                deltas.push(StateDelta::overwrite("paper_name", paper_name.clone()));
            }
            Ok(StageOutcome::with_deltas(deltas))
        }
        .boxed()
    }
}

// ========== 阶段 2: 评分扇出 ==========

/// 评分扇出阶段：按页并发外呼评分服务
///
/// 恢复执行时跳过状态里已有结果的页；结果按完成顺序追加，
/// 后续阶段一律自行按页下标排序。
pub struct GradePagesStage;

impl Stage for GradePagesStage {
    fn name(&self) -> &'static str {
        "grade_pages"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            let specs = page_specs_from_input(&ctx.input)?;
            let already_graded: HashSet<usize> = pages_from_state(state, "page_results")?
                .iter()
                .map(|p| p.page_index)
                .collect();

            let todo: Vec<PageSpec> = specs
                .into_iter()
                .filter(|s| !already_graded.contains(&s.page_index))
                .collect();

            if todo.is_empty() {
                info!("[运行 {}] 所有页面已有评分结果，跳过扇出", ctx.run_id);
                return Ok(StageOutcome::done());
            }

            info!(
                "[运行 {}] 🔍 评分扇出: {} 页, 并发上限 {}",
                ctx.run_id,
                todo.len(),
                ctx.grading_concurrency
            );

            let results: Vec<Result<Option<PageGradingResult>>> =
                futures::stream::iter(todo.into_iter().map(|spec| async move {
                    if ctx.is_cancelled() {
                        // 取消后的晚到输出直接丢弃
                        return Ok(None);
                    }
                    let page = ctx.scorer.score_page(&spec).await?;
                    info!("[运行 {}] ✓ 页 {} 评分完成", ctx.run_id, page.page_index);
                    Ok(Some(page))
                }))
                .buffer_unordered(ctx.grading_concurrency.max(1))
                .collect()
                .await;

            let mut graded = Vec::new();
            for result in results {
                if let Some(page) = result? {
                    graded.push(serde_json::to_value(page)?);
                }
            }

            Ok(StageOutcome::with_deltas(vec![StateDelta::append(
                "page_results",
                JsonValue::Array(graded),
            )]))
        }
        .boxed()
    }
}

// ========== 阶段 3: 人工复核闸口 ==========

/// 人工复核闸口：低置信度结果挂起等待确认
pub struct ReviewGateStage {
    /// 触发复核的题目置信度阈值
    pub review_threshold: f64,
}

impl Stage for ReviewGateStage {
    fn name(&self) -> &'static str {
        "review_gate"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            // 已有人工输入（恢复执行），直接放行
            if state.contains_key("review_input") {
                info!("[运行 {}] ✓ 已收到人工复核输入，继续执行", ctx.run_id);
                return Ok(StageOutcome::done());
            }

            let pages = pages_from_state(state, "page_results")?;
            let mut suspicious: Vec<usize> = pages
                .iter()
                .filter(|p| {
                    p.questions
                        .iter()
                        .any(|q| q.confidence < self.review_threshold)
                })
                .map(|p| p.page_index)
                .collect();
            suspicious.sort_unstable();

            let forced = ctx
                .input
                .get("require_review")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            if suspicious.is_empty() && !forced {
                return Ok(StageOutcome::done());
            }

            let interrupt = InterruptRequest {
                reason: format!(
                    "需要人工复核: {} 页评分置信度低于 {:.2}",
                    suspicious.len(),
                    self.review_threshold
                ),
                answer_field: "review_input".to_string(),
                payload: json!({ "pages": suspicious }),
            };

            warn!("[运行 {}] ⏸️ {}", ctx.run_id, interrupt.reason);

            // 先登记未决续体再返回标记：主信号丢失时兜底通路仍可判定挂起
            ctx.raise_interrupt(interrupt.clone());
            Ok(StageOutcome::interrupted(interrupt))
        }
        .boxed()
    }
}

// ========== 阶段 4: 跨页合并 ==========

/// 跨页合并阶段
pub struct MergeQuestionsStage;

impl Stage for MergeQuestionsStage {
    fn name(&self) -> &'static str {
        "merge_cross_page"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            let pages = pages_from_state(state, "page_results")?;
            let merged = merge_cross_page(&pages);

            let cross_page_count: usize = merged
                .iter()
                .flat_map(|p| p.questions.iter())
                .filter(|q| q.is_cross_page)
                .count();
            if cross_page_count > 0 {
                info!(
                    "[运行 {}] 🔗 合并了 {} 道跨页题目",
                    ctx.run_id, cross_page_count
                );
            }

            Ok(StageOutcome::with_deltas(vec![StateDelta::overwrite(
                "merged_pages",
                serde_json::to_value(merged)?,
            )]))
        }
        .boxed()
    }
}

// ========== 阶段 5: 边界检测 ==========

/// 学生边界检测阶段
pub struct DetectBoundariesStage {
    /// 低于该置信度的边界标记为需人工确认
    pub confirm_threshold: f64,
}

impl Stage for DetectBoundariesStage {
    fn name(&self) -> &'static str {
        "detect_boundaries"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            let mut pages = pages_from_state(state, "merged_pages")?;
            if pages.is_empty() {
                pages = pages_from_state(state, "page_results")?;
            }

            let detector = BoundaryDetector::new(self.confirm_threshold);
            let outcome = detector.detect(&pages);

            info!(
                "[运行 {}] 👥 检测到 {} 个学生边界, {} 页未归属",
                ctx.run_id,
                outcome.boundaries.len(),
                outcome.unassigned_pages.len()
            );

            Ok(StageOutcome::with_deltas(vec![
                StateDelta::overwrite("boundaries", serde_json::to_value(&outcome.boundaries)?),
                StateDelta::overwrite(
                    "unassigned_pages",
                    serde_json::to_value(&outcome.unassigned_pages)?,
                ),
            ]))
        }
        .boxed()
    }
}

// ========== 阶段 6: 学生级汇总 ==========

/// 学生级汇总阶段
pub struct AggregateStage;

impl Stage for AggregateStage {
    fn name(&self) -> &'static str {
        "aggregate_results"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, Result<StageOutcome>> {
        async move {
            let mut pages = pages_from_state(state, "merged_pages")?;
            if pages.is_empty() {
                pages = pages_from_state(state, "page_results")?;
            }
            let boundaries: Vec<StudentBoundary> = match state.get("boundaries") {
                Some(value) => {
                    serde_json::from_value(value.clone()).context("无法解析状态字段 boundaries")?
                }
                None => Vec::new(),
            };

            let results = aggregate(&boundaries, &pages);
            let needs_confirmation = boundaries.iter().filter(|b| b.needs_confirmation).count();

            info!(
                "[运行 {}] 📊 汇总完成: {} 名学生, {} 个边界待确认",
                ctx.run_id,
                results.len(),
                needs_confirmation
            );

            Ok(StageOutcome::with_deltas(vec![
                StateDelta::overwrite("student_results", serde_json::to_value(&results)?),
                StateDelta::overwrite(
                    "summary",
                    json!({
                        "students": results.len(),
                        "needs_confirmation": needs_confirmation,
                    }),
                ),
            ]))
        }
        .boxed()
    }
}
