//! 执行驱动器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责单个运行的逐阶段推进，是运行级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **准入控制**：先向调速器申请运行名额，排队期间保持 PENDING
//! 2. **阶段推进**：按序执行阶段，把产出增量确定性地并入累积状态
//! 3. **事件发布**：每个阶段发开始/结束事件，终态发快照与结束标记
//! 4. **检查点**：每个阶段成功后落盘，恢复时从检查点精确续跑
//! 5. **双路挂起检测**：显式中断标记 + 未决续体兜底，任一命中即挂起
//! 6. **失败处理**：阶段报错即整个运行失败，保留现场，不自动重试

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::models::run::{Checkpoint, EventKind, RunStatus, StateMap};
use crate::orchestrator::engine::EngineCore;
use crate::workflow::stage::{MergeStrategy, StageCtx, StateDelta, Workflow};

/// 挂起期间在状态里保存中断记录的字段名
pub const PENDING_INTERRUPT_FIELD: &str = "__pending_interrupt";

/// 执行驱动器
pub(crate) struct ExecutionDriver {
    core: Arc<EngineCore>,
}

impl ExecutionDriver {
    /// 派生驱动任务（创建与恢复共用入口）
    pub(crate) fn spawn(core: Arc<EngineCore>, run_id: String, workflow: Arc<Workflow>) {
        let cancel = core.register_cancel_flag(&run_id);
        tokio::spawn(async move {
            let driver = ExecutionDriver { core: core.clone() };
            if let Err(e) = driver.drive(&run_id, workflow, cancel).await {
                error!("[运行 {}] ❌ 驱动过程中发生错误: {}", run_id, e);
            }
            core.remove_cancel_flag(&run_id);
        });
    }

    /// 驱动运行直至挂起或终态
    async fn drive(
        &self,
        run_id: &str,
        workflow: Arc<Workflow>,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        // 准入控制：名额耗尽时在此排队（运行保持 PENDING）
        let _permit = self.core.governor.admit_run().await?;

        let run = self.core.registry.get(run_id)?;
        let resumed = match run.status {
            RunStatus::Pending => false,
            RunStatus::Paused => true,
            RunStatus::Cancelled => {
                info!("[运行 {}] 排队期间已被取消，放弃驱动", run_id);
                return Ok(());
            }
            other => {
                warn!("[运行 {}] 意外状态 {}，跳过驱动", run_id, other);
                return Ok(());
            }
        };

        self.core.registry.transition(run_id, RunStatus::Running)?;

        // 从检查点精确续跑；首次执行则从空状态、阶段 0 开始
        let (mut state, start_stage) = match self.core.store.load_checkpoint(run_id) {
            Some(checkpoint) => (checkpoint.state, checkpoint.next_stage),
            None => (StateMap::new(), 0),
        };

        if resumed {
            let stage_name = workflow
                .stages
                .get(start_stage)
                .map(|s| s.name())
                .unwrap_or("");
            info!("[运行 {}] ▶️ 从阶段 {} 恢复执行", run_id, stage_name);
            if !self.emit(run_id, EventKind::RunResumed, Some(stage_name), json!({})) {
                return Ok(());
            }
        } else {
            info!("[运行 {}] 🚀 开始执行工作流 {}", run_id, workflow.name);
            if !self.emit(
                run_id,
                EventKind::RunStarted,
                None,
                json!({ "workflow": &workflow.name }),
            ) {
                return Ok(());
            }
        }

        let ctx = StageCtx::new(
            run_id,
            workflow.name.clone(),
            run.input.clone(),
            self.core.governor.grading_concurrency(&workflow),
            self.core.scorer.clone(),
            cancel.clone(),
        );

        for stage_index in start_stage..workflow.stages.len() {
            if *cancel.borrow() {
                info!("[运行 {}] 🛑 已取消，停止推进", run_id);
                return Ok(());
            }

            let stage = &workflow.stages[stage_index];
            if !self.emit(run_id, EventKind::StageStarted, Some(stage.name()), json!({})) {
                return Ok(());
            }

            let outcome = match stage.run(&ctx, &state).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // 取消竞态下的阶段报错不算失败，晚到输出直接丢弃
                    if *cancel.borrow() {
                        info!("[运行 {}] 🛑 已取消，丢弃阶段报错: {}", run_id, e);
                        return Ok(());
                    }
                    self.fail_run(run_id, stage.name(), stage_index, state, &e);
                    return Ok(());
                }
            };

            let delta_fields: Vec<String> =
                outcome.deltas.iter().map(|d| d.field.clone()).collect();
            apply_deltas(&mut state, outcome.deltas);

            // 双路挂起检测：显式标记优先，丢失时由未决续体兜底
            let interrupt = match outcome.interrupt {
                Some(marker) => {
                    let _ = ctx.take_pending_interrupt();
                    Some(marker)
                }
                None => {
                    let fallback = ctx.take_pending_interrupt();
                    if fallback.is_some() {
                        warn!(
                            "[运行 {}] ⚠️ 阶段 {} 的中断标记丢失，由未决续体兜底判定挂起",
                            run_id,
                            stage.name()
                        );
                    }
                    fallback
                }
            };

            if let Some(interrupt) = interrupt {
                state.insert(
                    PENDING_INTERRUPT_FIELD.to_string(),
                    serde_json::to_value(&interrupt)?,
                );
                // 检查点停在本阶段：恢复后本阶段带着人工输入重跑，
                // 更早的阶段绝不重放
                self.core.store.save_checkpoint(Checkpoint::new(
                    run_id.to_string(),
                    stage_index,
                    state,
                ))?;
                self.core.registry.transition(run_id, RunStatus::Paused)?;
                self.emit(
                    run_id,
                    EventKind::RunPaused,
                    Some(stage.name()),
                    json!({
                        "reason": &interrupt.reason,
                        "answer_field": &interrupt.answer_field,
                        "payload": &interrupt.payload,
                    }),
                );
                info!("[运行 {}] ⏸️ 挂起等待人工输入: {}", run_id, interrupt.reason);
                // 挂起不追加流结束标记，消费者继续等待
                return Ok(());
            }

            if !self.emit(
                run_id,
                EventKind::StageCompleted,
                Some(stage.name()),
                json!({ "fields": delta_fields }),
            ) {
                return Ok(());
            }

            self.core.store.save_checkpoint(Checkpoint::new(
                run_id.to_string(),
                stage_index + 1,
                state.clone(),
            ))?;
        }

        if *cancel.borrow() {
            info!("[运行 {}] 🛑 已取消，丢弃收尾输出", run_id);
            return Ok(());
        }

        // 成功收尾：输出快照 + 终态事件 + 流结束标记
        self.core.registry.set_output(run_id, state.clone())?;
        if let Err(e) = self.core.registry.transition(run_id, RunStatus::Completed) {
            // 与取消竞态：终态已被抢先写入
            warn!("[运行 {}] 收尾转移被拒绝: {}", run_id, e);
            return Ok(());
        }
        self.emit(
            run_id,
            EventKind::FinalSnapshot,
            None,
            JsonValue::Object(state),
        );
        self.emit(run_id, EventKind::RunCompleted, None, json!({}));
        self.emit(run_id, EventKind::EndOfStream, None, json!({}));
        self.core.store.clear_checkpoint(run_id);
        info!("[运行 {}] ✅ 运行完成", run_id);
        Ok(())
    }

    /// 失败收尾：保留现场检查点，记录错误，不自动重试
    fn fail_run(
        &self,
        run_id: &str,
        stage_name: &str,
        stage_index: usize,
        state: StateMap,
        error: &anyhow::Error,
    ) {
        error!("[运行 {}] ❌ 阶段 {} 失败: {}", run_id, stage_name, error);

        // 部分状态保留下来供诊断
        let _ = self.core.store.save_checkpoint(Checkpoint::new(
            run_id.to_string(),
            stage_index,
            state,
        ));

        match self.core.registry.mark_failed(run_id, error.to_string()) {
            Ok(_) => {
                self.emit(
                    run_id,
                    EventKind::RunFailed,
                    Some(stage_name),
                    json!({ "error": error.to_string() }),
                );
                self.emit(run_id, EventKind::EndOfStream, None, json!({}));
            }
            Err(e) => warn!("[运行 {}] 标记失败被拒绝: {}", run_id, e),
        }
    }

    /// 发布事件；日志已关闭（取消竞态）时丢弃并返回 false
    fn emit(&self, run_id: &str, kind: EventKind, stage: Option<&str>, payload: JsonValue) -> bool {
        match self.core.bus.publish(run_id, kind, stage, payload) {
            Ok(_) => true,
            Err(e) => {
                warn!("[运行 {}] 晚到事件被丢弃 ({:?}): {}", run_id, kind, e);
                false
            }
        }
    }
}

/// 确定性地应用状态增量
///
/// 追加策略把值并入数组字段末尾（目标已存在但不是数组时先装箱），
/// 覆盖策略整体替换。并发扇出阶段分多次追加也不会互相覆盖。
pub fn apply_deltas(state: &mut StateMap, deltas: Vec<StateDelta>) {
    for delta in deltas {
        match delta.strategy {
            MergeStrategy::Overwrite => {
                state.insert(delta.field, delta.value);
            }
            MergeStrategy::Append => {
                let slot = state
                    .entry(delta.field)
                    .or_insert_with(|| JsonValue::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = JsonValue::Array(vec![slot.take()]);
                }
                let items = slot.as_array_mut().expect("已确保为数组");
                match delta.value {
                    JsonValue::Array(values) => items.extend(values),
                    other => items.push(other),
                }
            }
        }
    }
}
