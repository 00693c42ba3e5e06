/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时执行的运行数量（全局上限，超出的运行排队等待）
    pub max_concurrent_runs: usize,
    /// 单个运行内同时外呼的评分调用数量（默认值）
    pub default_grading_concurrency: usize,
    /// 批量阅卷工作流的评分并发覆盖值
    pub batch_grading_concurrency: usize,
    /// 边界置信度确认阈值（低于该值标记为需人工确认）
    pub confirm_threshold: f64,
    /// 触发人工复核中断的题目置信度阈值
    pub review_confidence_threshold: f64,
    /// 事件流等待时的兜底轮询间隔（毫秒）
    pub event_poll_interval_ms: u64,
    /// 预评分 TOML 文件存放目录
    pub toml_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否使用远程评分服务（否则使用本地回放评分器）
    pub remote_scoring: bool,
    // --- 评分服务 API 配置 ---
    pub scoring_api_base_url: String,
    pub scoring_api_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            default_grading_concurrency: 3,
            batch_grading_concurrency: 8,
            confirm_threshold: 0.8,
            review_confidence_threshold: 0.35,
            event_poll_interval_ms: 200,
            toml_folder: "scored_pages".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            remote_scoring: false,
            scoring_api_base_url: "http://grading-vision.internal/v1".to_string(),
            scoring_api_token: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_runs: std::env::var("MAX_CONCURRENT_RUNS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_runs),
            default_grading_concurrency: std::env::var("DEFAULT_GRADING_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.default_grading_concurrency),
            batch_grading_concurrency: std::env::var("BATCH_GRADING_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_grading_concurrency),
            confirm_threshold: std::env::var("CONFIRM_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(default.confirm_threshold),
            review_confidence_threshold: std::env::var("REVIEW_CONFIDENCE_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(default.review_confidence_threshold),
            event_poll_interval_ms: std::env::var("EVENT_POLL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.event_poll_interval_ms),
            toml_folder: std::env::var("TOML_FOLDER").unwrap_or(default.toml_folder),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            remote_scoring: std::env::var("REMOTE_SCORING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.remote_scoring),
            scoring_api_base_url: std::env::var("SCORING_API_BASE_URL").unwrap_or(default.scoring_api_base_url),
            scoring_api_token: std::env::var("SCORING_API_TOKEN").unwrap_or(default.scoring_api_token),
        }
    }
}
