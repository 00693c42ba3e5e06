//! 评分服务抽象 - 基础设施层
//!
//! 视觉评分是外部协作方，这里只定义"给一页评分"的能力。
//! 生产环境走 HTTP 客户端，离线/测试用预置结果回放。

use std::collections::HashMap;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::{AppError, ScoringError};
use crate::models::grading::{PageGradingResult, PageSpec, PaperFixture};

/// 页面评分能力
///
/// 职责：
/// - 接收一页的图像引用，返回该页的题目评分结果
/// - 不认识运行 / 阶段，不处理并发控制
pub trait PageScorer: Send + Sync {
    /// 对单个页面评分
    fn score_page<'a>(&'a self, spec: &'a PageSpec) -> BoxFuture<'a, Result<PageGradingResult>>;
}

/// 回放评分器
///
/// 按图像引用返回预置的评分结果，用于离线模式与测试。
#[derive(Default)]
pub struct ScriptedScorer {
    pages: HashMap<String, PageGradingResult>,
}

impl ScriptedScorer {
    /// 从试卷包列表构建（图像引用 = 试卷名#页下标）
    pub fn from_fixtures(fixtures: &[PaperFixture]) -> Self {
        let mut pages = HashMap::new();
        for fixture in fixtures {
            for page in &fixture.pages {
                pages.insert(
                    PaperFixture::image_ref(&fixture.name, page.page_index),
                    page.clone(),
                );
            }
        }
        Self { pages }
    }

    /// 从单份页面列表构建（图像引用 = page#页下标，测试用）
    pub fn from_pages(pages: &[PageGradingResult]) -> Self {
        let mut map = HashMap::new();
        for page in pages {
            map.insert(format!("page#{}", page.page_index), page.clone());
        }
        Self { pages: map }
    }
}

/// 构造 from_pages 评分器对应的运行输入载荷
pub fn scripted_payload(paper_name: &str, pages: &[PageGradingResult]) -> serde_json::Value {
    let specs: Vec<serde_json::Value> = pages
        .iter()
        .map(|p| {
            serde_json::json!({
                "page_index": p.page_index,
                "image_ref": format!("page#{}", p.page_index),
            })
        })
        .collect();
    serde_json::json!({
        "paper_name": paper_name,
        "pages": specs,
    })
}

impl PageScorer for ScriptedScorer {
    fn score_page<'a>(&'a self, spec: &'a PageSpec) -> BoxFuture<'a, Result<PageGradingResult>> {
        async move {
            match self.pages.get(&spec.image_ref) {
                Some(page) => Ok(page.clone()),
                None => Err(AppError::Scoring(ScoringError::MissingFixture {
                    image_ref: spec.image_ref.clone(),
                })
                .into()),
            }
        }
        .boxed()
    }
}
