//! 运行引擎集成测试
//!
//! 覆盖状态机转移、幂等提交、挂起/恢复、取消、重试、
//! 事件序号与流结束语义。

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tokio_test::assert_ok;

use batch_paper_grading::error::{AppError, InputError};
use batch_paper_grading::infrastructure::scorer::{scripted_payload, ScriptedScorer};
use batch_paper_grading::models::run::{EventKind, RunStatus, StateMap};
use batch_paper_grading::models::{PageGradingResult, QuestionResult};
use batch_paper_grading::workflow::{
    InterruptRequest, Stage, StageCtx, StageOutcome, Workflow, BATCH_GRADING_WORKFLOW,
};
use batch_paper_grading::{Config, GradingEngine, MemoryRunStore};

fn test_config() -> Config {
    Config {
        max_concurrent_runs: 2,
        default_grading_concurrency: 2,
        batch_grading_concurrency: 4,
        event_poll_interval_ms: 20,
        ..Config::default()
    }
}

/// 构造一个普通页面（置信度足够高，不会触发自动复核）
fn page(page_index: usize, question_ids: &[&str]) -> PageGradingResult {
    let mut page = PageGradingResult::new(page_index);
    page.questions = question_ids
        .iter()
        .map(|id| {
            let mut q = QuestionResult::new(*id, 3.0, 5.0, 0.9);
            q.page_indices = vec![page_index];
            q
        })
        .collect();
    page
}

fn sample_pages() -> Vec<PageGradingResult> {
    vec![
        page(0, &["1", "2"]),
        page(1, &["3", "4"]),
        page(2, &["5", "6"]),
    ]
}

fn engine_with_pages(config: Config, pages: &[PageGradingResult]) -> GradingEngine {
    GradingEngine::new(
        config,
        Arc::new(MemoryRunStore::new()),
        Arc::new(ScriptedScorer::from_pages(pages)),
    )
}

/// 轮询等待运行到达目标状态
async fn wait_for_status(engine: &GradingEngine, run_id: &str, status: RunStatus) {
    for _ in 0..300 {
        if engine.get_status(run_id).expect("查询状态失败").status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("等待状态 {} 超时", status);
}

#[tokio::test]
async fn test_run_completes_full_pipeline() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let run_id = assert_ok!(engine.start_run(
        BATCH_GRADING_WORKFLOW,
        scripted_payload("卷A", &pages),
        Some("卷A"),
    ));

    // 事件流应有限结束
    let mut stream = engine.stream_run(&run_id).expect("打开事件流失败");
    let mut kinds = Vec::new();
    while let Some(event) = stream.next().await {
        kinds.push(event.kind);
    }

    assert_eq!(kinds.first(), Some(&EventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&EventKind::RunCompleted));
    assert!(kinds.contains(&EventKind::FinalSnapshot), "缺少最终快照事件");

    let report = engine.get_status(&run_id).expect("查询状态失败");
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.progress.completed_stages, report.progress.total_stages);
    assert_eq!(report.progress.pages_graded, 3);

    let output = engine
        .get_final_output(&run_id)
        .expect("查询输出失败")
        .expect("成功结束的运行应有输出快照");
    assert!(output.contains_key("student_results"), "输出缺少学生结果");
    assert!(output.contains_key("boundaries"), "输出缺少边界");
}

#[tokio::test]
async fn test_event_sequences_are_gap_free() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, scripted_payload("卷B", &pages), None)
        .expect("提交失败");

    wait_for_status(&engine, &run_id, RunStatus::Completed).await;

    // 持久日志序号从 1 开始、连续无空洞，结束标记收尾
    let log = engine.event_log(&run_id);
    assert!(!log.is_empty());
    for (idx, event) in log.iter().enumerate() {
        assert_eq!(event.sequence, idx as u64 + 1, "事件序号出现空洞");
    }
    assert!(log.last().expect("非空").kind.is_end_of_stream());
}

#[tokio::test]
async fn test_idempotent_start_run() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let mut payload = scripted_payload("卷C", &pages);
    payload["require_review"] = json!(true);

    let first = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload.clone(), Some("key-1"))
        .expect("提交失败");

    // 运行保持活跃（最终会挂起等待复核），同键提交必须命中同一个运行
    let second = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload.clone(), Some("key-1"))
        .expect("提交失败");
    assert_eq!(first, second, "幂等键命中时应返回原运行ID");

    wait_for_status(&engine, &first, RunStatus::Paused).await;
    let third = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload.clone(), Some("key-1"))
        .expect("提交失败");
    assert_eq!(first, third, "挂起的运行仍是活跃运行");

    // 运行结束后同键提交应创建新运行
    engine
        .send_event(&first, json!({ "confirmed": true }))
        .expect("恢复失败");
    wait_for_status(&engine, &first, RunStatus::Completed).await;

    let fourth = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload, Some("key-1"))
        .expect("提交失败");
    assert_ne!(first, fourth, "终态运行不应再被幂等键命中");
}

#[tokio::test]
async fn test_unknown_workflow_rejected() {
    let engine = engine_with_pages(test_config(), &[]);

    let err = engine
        .start_run("not_registered", json!({}), None)
        .expect_err("未知工作流应被拒绝");

    let app_err = err.downcast_ref::<AppError>().expect("应为 AppError");
    assert!(matches!(
        app_err,
        AppError::Input(InputError::UnknownWorkflow { .. })
    ));
}

#[tokio::test]
async fn test_malformed_payload_rejected() {
    let engine = engine_with_pages(test_config(), &[]);

    for payload in [json!({}), json!({ "pages": [] }), json!({ "pages": [{}] })] {
        let err = engine
            .start_run(BATCH_GRADING_WORKFLOW, payload, None)
            .expect_err("非法载荷应被同步拒绝");
        let app_err = err.downcast_ref::<AppError>().expect("应为 AppError");
        assert!(matches!(
            app_err,
            AppError::Input(InputError::MalformedPayload { .. })
        ));
    }
}

#[tokio::test]
async fn test_pause_and_resume_continues_after_interrupt() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let mut payload = scripted_payload("卷D", &pages);
    payload["require_review"] = json!(true);

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload, None)
        .expect("提交失败");

    wait_for_status(&engine, &run_id, RunStatus::Paused).await;

    let log_at_pause = engine.event_log(&run_id);
    assert!(
        log_at_pause.iter().any(|e| e.kind == EventKind::RunPaused),
        "缺少挂起事件"
    );
    assert!(
        log_at_pause.iter().all(|e| !e.kind.is_end_of_stream()),
        "挂起不能追加流结束标记"
    );

    // 挂起期间消费者应继续阻塞等待，而不是看到假结束
    let mut stream = engine.stream_run(&run_id).expect("打开事件流失败");
    for _ in 0..log_at_pause.len() {
        stream.next().await.expect("追平持久日志失败");
    }
    let blocked = tokio::time::timeout(Duration::from_millis(80), stream.next()).await;
    assert!(blocked.is_err(), "挂起的运行不应结束事件流");

    engine
        .send_event(&run_id, json!({ "confirmed": true }))
        .expect("恢复失败");
    wait_for_status(&engine, &run_id, RunStatus::Completed).await;

    let log = engine.event_log(&run_id);

    // 挂起前的事件原样保留为前缀，序号绝不重发
    assert_eq!(&log[..log_at_pause.len()], &log_at_pause[..]);
    for (idx, event) in log.iter().enumerate() {
        assert_eq!(event.sequence, idx as u64 + 1);
    }

    // 中断点之前的阶段不重放：评分扇出只执行一次，复核闸口重跑一次
    let stage_starts = |name: &str| {
        log.iter()
            .filter(|e| e.kind == EventKind::StageStarted && e.stage.as_deref() == Some(name))
            .count()
    };
    assert_eq!(stage_starts("grade_pages"), 1, "评分扇出阶段被重放");
    assert_eq!(stage_starts("review_gate"), 2, "复核闸口应在恢复后重跑一次");
    assert!(log.iter().any(|e| e.kind == EventKind::RunResumed));
}

/// 只登记未决续体、故意不返回显式中断标记的阶段
struct SilentPauseStage;

impl Stage for SilentPauseStage {
    fn name(&self) -> &'static str {
        "silent_pause"
    }

    fn run<'a>(
        &'a self,
        ctx: &'a StageCtx,
        state: &'a StateMap,
    ) -> BoxFuture<'a, anyhow::Result<StageOutcome>> {
        async move {
            if state.contains_key("answer") {
                return Ok(StageOutcome::done());
            }
            ctx.raise_interrupt(InterruptRequest {
                reason: "标记丢失场景".to_string(),
                answer_field: "answer".to_string(),
                payload: json!({}),
            });
            // 显式标记被"吞掉"，驱动器必须靠未决续体兜底判定挂起
            Ok(StageOutcome::done())
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_pause_detected_without_explicit_marker() {
    let engine = engine_with_pages(test_config(), &[]);
    engine.register_workflow(Workflow {
        name: "silent".to_string(),
        stages: vec![Arc::new(SilentPauseStage)],
        grading_concurrency: None,
        validate_input: None,
    });

    let run_id = engine
        .start_run("silent", json!({}), None)
        .expect("提交失败");

    wait_for_status(&engine, &run_id, RunStatus::Paused).await;

    engine
        .send_event(&run_id, json!("ok"))
        .expect("恢复失败");
    wait_for_status(&engine, &run_id, RunStatus::Completed).await;

    let state = engine.get_state(&run_id).expect("读取状态失败");
    assert_eq!(state.get("answer"), Some(&json!("ok")));
}

#[tokio::test]
async fn test_stage_failure_marks_run_failed() {
    let pages = vec![page(0, &["1"]), page(1, &["2"])];
    let engine = engine_with_pages(test_config(), &pages);

    // 载荷里混入一个评分服务不认识的页面
    let mut payload = scripted_payload("卷E", &pages);
    payload["pages"]
        .as_array_mut()
        .expect("数组")
        .push(json!({ "page_index": 9, "image_ref": "page#9" }));

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload, None)
        .expect("提交失败");

    wait_for_status(&engine, &run_id, RunStatus::Failed).await;

    let report = engine.get_status(&run_id).expect("查询状态失败");
    assert!(report.error.is_some(), "失败的运行应记录错误信息");

    // 部分状态保留下来供诊断
    let state = engine.get_state(&run_id).expect("读取状态失败");
    assert_eq!(state.get("total_pages"), Some(&json!(3)));

    // 失败也要正确收尾事件流
    let log = engine.event_log(&run_id);
    assert!(log.iter().any(|e| e.kind == EventKind::RunFailed));
    assert!(log.last().expect("非空").kind.is_end_of_stream());
}

#[tokio::test]
async fn test_retry_creates_new_run_and_preserves_original() {
    let pages = vec![page(0, &["1"])];
    let engine = engine_with_pages(test_config(), &pages);

    let mut payload = scripted_payload("卷F", &pages);
    payload["pages"]
        .as_array_mut()
        .expect("数组")
        .push(json!({ "page_index": 7, "image_ref": "page#7" }));

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload, None)
        .expect("提交失败");
    wait_for_status(&engine, &run_id, RunStatus::Failed).await;

    let retry_id = engine.retry(&run_id).expect("重试失败");
    assert_ne!(run_id, retry_id, "重试必须创建全新运行");

    wait_for_status(&engine, &retry_id, RunStatus::Failed).await;

    // 原运行原样保留
    let original = engine.get_status(&run_id).expect("查询状态失败");
    assert_eq!(original.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_cancel_is_terminal_and_final() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let mut payload = scripted_payload("卷G", &pages);
    payload["require_review"] = json!(true);

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, payload, None)
        .expect("提交失败");
    wait_for_status(&engine, &run_id, RunStatus::Paused).await;

    assert!(engine.cancel(&run_id), "活跃运行应可取消");
    assert_eq!(
        engine.get_status(&run_id).expect("查询状态失败").status,
        RunStatus::Cancelled
    );

    // 终态不可再转移
    assert!(!engine.cancel(&run_id), "终态运行不应再次取消成功");
    assert!(
        engine.send_event(&run_id, json!({})).is_err(),
        "已取消的运行不应接受恢复输入"
    );

    let log = engine.event_log(&run_id);
    assert!(log.iter().any(|e| e.kind == EventKind::RunCancelled));
    assert!(log.last().expect("非空").kind.is_end_of_stream());
}

#[tokio::test]
async fn test_completed_run_cannot_be_cancelled() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, scripted_payload("卷H", &pages), None)
        .expect("提交失败");
    wait_for_status(&engine, &run_id, RunStatus::Completed).await;

    assert!(!engine.cancel(&run_id));
    assert_eq!(
        engine.get_status(&run_id).expect("查询状态失败").status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_get_state_falls_back_to_output_after_completion() {
    let pages = sample_pages();
    let engine = engine_with_pages(test_config(), &pages);

    let run_id = engine
        .start_run(BATCH_GRADING_WORKFLOW, scripted_payload("卷I", &pages), None)
        .expect("提交失败");
    wait_for_status(&engine, &run_id, RunStatus::Completed).await;

    // 完成后检查点已清除，get_state 回落到输出快照
    let state = engine.get_state(&run_id).expect("读取状态失败");
    let output = engine
        .get_final_output(&run_id)
        .expect("查询输出失败")
        .expect("应有输出");
    assert_eq!(state, output);
    assert!(state.contains_key("student_results"));
}

#[tokio::test]
async fn test_paused_run_releases_global_slot() {
    // 全局只允许 1 个运行同时执行
    let config = Config {
        max_concurrent_runs: 1,
        event_poll_interval_ms: 20,
        ..Config::default()
    };
    let pages = sample_pages();
    let engine = engine_with_pages(config, &pages);

    let mut paused_payload = scripted_payload("卷J", &pages);
    paused_payload["require_review"] = json!(true);

    let paused_run = engine
        .start_run(BATCH_GRADING_WORKFLOW, paused_payload, None)
        .expect("提交失败");
    wait_for_status(&engine, &paused_run, RunStatus::Paused).await;

    // 挂起释放全局名额，第二个运行得以执行完毕
    let second_run = engine
        .start_run(BATCH_GRADING_WORKFLOW, scripted_payload("卷K", &pages), None)
        .expect("提交失败");
    wait_for_status(&engine, &second_run, RunStatus::Completed).await;

    // 恢复后第一个运行也正常完成
    engine
        .send_event(&paused_run, json!({ "confirmed": true }))
        .expect("恢复失败");
    wait_for_status(&engine, &paused_run, RunStatus::Completed).await;
}
