//! 页面评分结果模型
//!
//! 评分服务按页返回结果，页内是若干道题的得分明细。
//! 历史版本里题目列表字段名不统一，反序列化时同时接受旧字段名。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// 评分点（按条给分的明细）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPoint {
    /// 评分点描述（合并时按描述去重）
    pub description: String,
    /// 实得分
    pub awarded: f64,
    /// 满分
    pub max: f64,
}

/// 单题评分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    /// 题号（原始字符串，如 "5"、"(5)"、"【5】"、"五、"）
    pub question_id: String,
    /// 得分，不超过 max_score
    pub score: f64,
    /// 满分
    pub max_score: f64,
    /// 置信度，[0, 1]
    pub confidence: f64,
    /// 评语
    #[serde(default)]
    pub feedback: String,
    /// 来源页下标（跨页题目多于一个）
    #[serde(default)]
    pub page_indices: Vec<usize>,
    /// 合并来源标签
    #[serde(default)]
    pub merge_tags: Vec<String>,
    /// 是否由跨页合并产生
    #[serde(default)]
    pub is_cross_page: bool,
    /// 本题在下一页继续（跨页合并的判定依据）
    #[serde(default, alias = "continued")]
    pub continues_on_next_page: bool,
    /// 按条给分明细（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scoring_points: Option<Vec<ScoringPoint>>,
}

impl QuestionResult {
    /// 创建基础题目结果（其余字段用默认值）
    pub fn new(
        question_id: impl Into<String>,
        score: f64,
        max_score: f64,
        confidence: f64,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            score,
            max_score,
            confidence,
            feedback: String::new(),
            page_indices: Vec::new(),
            merge_tags: Vec::new(),
            is_cross_page: false,
            continues_on_next_page: false,
            scoring_points: None,
        }
    }
}

/// 学生身份标记（页面上识别出的姓名/考号）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityMarker {
    pub name: String,
    /// 识别置信度，[0, 1]
    pub confidence: f64,
}

/// 单页评分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageGradingResult {
    /// 页下标，在一次运行内唯一
    pub page_index: usize,
    /// 本页题目结果列表
    ///
    /// 兼容历史字段名 `question_results` / `items`
    #[serde(default, alias = "question_results", alias = "items")]
    pub questions: Vec<QuestionResult>,
    /// 页面上声明的学生身份标记
    #[serde(
        default,
        alias = "student_marker",
        skip_serializing_if = "Option::is_none"
    )]
    pub identity_marker: Option<IdentityMarker>,
    /// 空白页标记
    #[serde(default)]
    pub is_blank: bool,
}

impl PageGradingResult {
    /// 创建空页面结果
    pub fn new(page_index: usize) -> Self {
        Self {
            page_index,
            questions: Vec::new(),
            identity_marker: None,
            is_blank: false,
        }
    }
}

/// 待评分页面描述（交给评分服务的输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpec {
    pub page_index: usize,
    /// 页面图像引用（由页面转图服务产出，这里只透传）
    pub image_ref: String,
}

/// 预评分试卷包
///
/// 离线/回放模式的输入：一份试卷的全部页面评分结果，
/// 从 TOML 文件加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperFixture {
    pub name: String,
    #[serde(default)]
    pub pages: Vec<PageGradingResult>,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

impl PaperFixture {
    /// 页面的全局唯一图像引用（试卷名 + 页下标）
    pub fn image_ref(name: &str, page_index: usize) -> String {
        format!("{}#{}", name, page_index)
    }

    /// 构造该试卷对应的运行输入载荷
    pub fn run_payload(&self) -> JsonValue {
        let pages: Vec<JsonValue> = self
            .pages
            .iter()
            .map(|p| {
                json!({
                    "page_index": p.page_index,
                    "image_ref": Self::image_ref(&self.name, p.page_index),
                })
            })
            .collect();
        json!({
            "paper_name": self.name,
            "pages": pages,
        })
    }
}
