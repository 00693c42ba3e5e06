//! 批量阅卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是离线批量模式的入口，负责批量试卷的提交与收尾。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：启动日志、加载预评分试卷、组装引擎
//! 2. **批量提交**：每份试卷提交一个运行（幂等键 = 试卷名）
//! 3. **并发控制**：全局并发由引擎内的调速器统一管理
//! 4. **事件消费**：逐运行消费事件流直至终态
//! 5. **自动确认**：非交互模式下对复核挂起自动补一个确认输入
//! 6. **全局统计**：汇总所有运行的处理结果

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::clients::HttpScoringClient;
use crate::config::Config;
use crate::infrastructure::run_store::MemoryRunStore;
use crate::infrastructure::scorer::{PageScorer, ScriptedScorer};
use crate::models::grading::PaperFixture;
use crate::models::loaders::load_all_toml_files;
use crate::models::run::{EventKind, RunStatus};
use crate::orchestrator::engine::GradingEngine;
use crate::utils::logging::{init_log_file, log_papers_loaded, log_startup, print_final_stats};
use crate::workflow::BATCH_GRADING_WORKFLOW;

/// 应用主结构
pub struct App {
    config: Config,
    engine: GradingEngine,
    fixtures: Vec<PaperFixture>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(config.max_concurrent_runs, config.batch_grading_concurrency);

        // 加载预评分试卷
        info!("\n📁 正在扫描预评分试卷...");
        let fixtures = load_all_toml_files(&config.toml_folder)
            .await
            .unwrap_or_else(|e| {
                warn!("⚠️ {}", e);
                Vec::new()
            });

        // 评分服务：远程 HTTP 客户端或本地回放
        let scorer: Arc<dyn PageScorer> = if config.remote_scoring {
            info!("🌐 使用远程评分服务: {}", config.scoring_api_base_url);
            Arc::new(HttpScoringClient::new(&config))
        } else {
            Arc::new(ScriptedScorer::from_fixtures(&fixtures))
        };

        let store = Arc::new(MemoryRunStore::new());
        let engine = GradingEngine::new(config.clone(), store, scorer);

        Ok(Self {
            config,
            engine,
            fixtures,
        })
    }

    /// 获取引擎引用（测试与嵌入使用）
    pub fn engine(&self) -> &GradingEngine {
        &self.engine
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        if self.fixtures.is_empty() {
            warn!("⚠️ 没有找到待阅的试卷，程序结束");
            return Ok(());
        }

        let total = self.fixtures.len();
        log_papers_loaded(total, self.config.max_concurrent_runs);

        // 全部提交，超出并发上限的运行由调速器排队
        let mut submitted = Vec::new();
        for fixture in &self.fixtures {
            match self.engine.start_run(
                BATCH_GRADING_WORKFLOW,
                fixture.run_payload(),
                Some(&fixture.name),
            ) {
                Ok(run_id) => {
                    info!("[{}] 运行已提交: {}", fixture.name, run_id);
                    submitted.push((fixture.name.clone(), run_id));
                }
                Err(e) => {
                    error!("[{}] ❌ 提交失败: {}", fixture.name, e);
                }
            }
        }

        // 逐运行消费事件流直至终态
        let mut success = 0;
        let mut failed = total - submitted.len();

        for (name, run_id) in submitted {
            self.consume_run(&name, &run_id).await?;

            let report = self.engine.get_status(&run_id)?;
            match report.status {
                RunStatus::Completed => {
                    success += 1;
                    self.log_paper_summary(&name, &run_id)?;
                }
                other => {
                    failed += 1;
                    error!(
                        "[{}] ❌ 运行未成功: {} (错误: {:?})",
                        name, other, report.error
                    );
                }
            }
        }

        print_final_stats(success, failed, total, &self.config.output_log_file);
        Ok(())
    }

    /// 消费单个运行的事件流直至结束
    async fn consume_run(&self, name: &str, run_id: &str) -> Result<()> {
        let mut stream = self.engine.stream_run(run_id)?;

        while let Some(event) = stream.next().await {
            if self.config.verbose_logging {
                info!(
                    "[{}] 事件 #{} {:?} {:?}",
                    name, event.sequence, event.kind, event.stage
                );
            }

            match event.kind {
                EventKind::StageCompleted => {
                    info!(
                        "[{}] ✓ 阶段完成: {}",
                        name,
                        event.stage.as_deref().unwrap_or("?")
                    );
                }
                EventKind::RunPaused => {
                    // 非交互模式：自动补一个确认输入，恢复运行
                    warn!("[{}] ⏸️ 运行挂起，自动确认后继续", name);
                    self.engine
                        .send_event(run_id, serde_json::json!({ "auto_confirmed": true }))?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// 输出单份试卷的汇总信息
    fn log_paper_summary(&self, name: &str, run_id: &str) -> Result<()> {
        let output = self.engine.get_final_output(run_id)?.unwrap_or_default();

        let students = output
            .get("summary")
            .and_then(|s| s.get("students"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let needs_confirmation = output
            .get("summary")
            .and_then(|s| s.get("needs_confirmation"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        info!(
            "[{}] ✅ 阅卷完成: {} 名学生, {} 个边界待人工确认",
            name, students, needs_confirmation
        );
        Ok(())
    }
}
