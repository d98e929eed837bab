use std::{env, path::PathBuf};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

/**
 * \brief 运行配置：远端接口、默认模型与本地文件位置。
 */
#[derive(Debug, Clone)]
pub struct AppConfig {
    /** \brief OpenAI 兼容接口基地址（含版本路径，如 https://openrouter.ai/api/v1） */
    pub api_base: String,
    /** \brief API Key；仅在发起远端调用时必需 */
    pub api_key: Option<String>,
    pub model: String,
    /** \brief Profile 设置文件 */
    pub settings_file: PathBuf,
    /** \brief 摘要缓存文件 */
    pub summaries_file: PathBuf,
    pub papers_dir: PathBuf,
    pub telemetry_enabled: bool,
    /** \brief 事件日志文件（仅在启用遥测时写入） */
    pub telemetry_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            settings_file: PathBuf::from("settings.json"),
            summaries_file: PathBuf::from("paper_summaries.json"),
            papers_dir: PathBuf::from("papers"),
            telemetry_enabled: false,
            telemetry_file: PathBuf::from(crate::telemetry::DEFAULT_LOG_FILE),
        }
    }
}

impl AppConfig {
    /**
     * \brief 读取 `.env`（若存在）与环境变量。
     */
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /**
     * \brief 通过任意键值查找构建配置，空字符串视为未设置。
     */
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            api_base: get("OPENROUTER_API_URL").unwrap_or(defaults.api_base),
            api_key: get("OPENROUTER_API_KEY"),
            model: get("SCISIFT_MODEL").unwrap_or(defaults.model),
            settings_file: get("SCISIFT_SETTINGS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.settings_file),
            summaries_file: get("SCISIFT_SUMMARIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.summaries_file),
            papers_dir: get("SCISIFT_PAPERS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.papers_dir),
            telemetry_enabled: get("SCISIFT_TELEMETRY")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.telemetry_enabled),
            telemetry_file: get("SCISIFT_TELEMETRY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.telemetry_file),
        }
    }
}
