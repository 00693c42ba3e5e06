/// 评分服务 API 客户端
///
/// 封装与远程视觉评分服务相关的调用逻辑
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, ScoringError};
use crate::infrastructure::scorer::PageScorer;
use crate::models::grading::{PageGradingResult, PageSpec};

/// 评分服务客户端
pub struct HttpScoringClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpScoringClient {
    /// 创建新的评分服务客户端
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.scoring_api_base_url.clone(),
            token: config.scoring_api_token.clone(),
        }
    }

    /// 检查响应是否成功
    fn is_success_response(result: &JsonValue) -> bool {
        if let Some(code) = result.get("code").and_then(|v| v.as_u64()) {
            code == 200
        } else {
            false
        }
    }

    async fn request_page(&self, spec: &PageSpec) -> Result<PageGradingResult> {
        let url = format!("{}/score/page", self.base_url);
        debug!("正在调用评分服务: {} (页面 {})", url, spec.page_index);

        let body = json!({
            "pageIndex": spec.page_index,
            "imageRef": spec.image_ref,
        });

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json, text/plain, */*")
            .header("gradingtoken", &self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("评分请求失败: {}", url))?;

        let result: JsonValue = response
            .json()
            .await
            .context("无法解析评分服务响应")?;

        if !Self::is_success_response(&result) {
            return Err(AppError::Scoring(ScoringError::BadResponse {
                page_index: spec.page_index,
                code: result.get("code").and_then(|v| v.as_u64()),
                message: result
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            })
            .into());
        }

        let data = result
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("评分服务返回缺少 data 字段"))?;

        let page: PageGradingResult =
            serde_json::from_value(data).context("无法反序列化页面评分结果")?;

        debug!("✓ 页面 {} 评分完成", spec.page_index);
        Ok(page)
    }
}

impl PageScorer for HttpScoringClient {
    fn score_page<'a>(&'a self, spec: &'a PageSpec) -> BoxFuture<'a, Result<PageGradingResult>> {
        self.request_page(spec).boxed()
    }
}
