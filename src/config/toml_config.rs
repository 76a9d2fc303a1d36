use crate::core::sampler::DEFAULT_CATCH_ALL_PENALTY;
use crate::core::ConfigProvider;
use crate::utils::error::{BotError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var regex"));

const DEFAULT_USER_AGENT: &str = "frs-notifier/0.1 (Feedback Request Service bot)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub wiki: WikiConfig,
    pub pages: PagesConfig,
    pub sending: Option<SendingConfig>,
    pub runfiles: Option<RunfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiConfig {
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: Option<String>,
}

/// 機器人使用的 wiki 頁面 ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesConfig {
    pub subscriptions: String,
    pub sent_count: String,
    pub ga_guidelines: String,
    pub rfcs_done: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendingConfig {
    pub min_messages: Option<usize>,
    pub max_messages: Option<usize>,
    pub edit_interval_seconds: Option<u64>,
    pub max_edits_per_run: Option<usize>,
    pub catch_all_penalty: Option<f64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunfileConfig {
    pub directory: String,
}

impl BotConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BotError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| BotError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${FRS_BOT_PASSWORD})，找不到的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    fn sending(&self) -> SendingConfig {
        self.sending.clone().unwrap_or_default()
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.sending.get_or_insert_with(SendingConfig::default).dry_run = Some(dry_run);
    }

    pub fn user_agent(&self) -> &str {
        self.wiki.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    /// 帳號密碼都有設定時才登入
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.wiki.username, &self.wiki.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    pub fn runfile_directory(&self) -> &str {
        self.runfiles
            .as_ref()
            .map(|r| r.directory.as_str())
            .unwrap_or(".")
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("wiki.api_url", &self.wiki.api_url)?;

        validation::validate_page_id("pages.subscriptions", &self.pages.subscriptions)?;
        validation::validate_page_id("pages.sent_count", &self.pages.sent_count)?;
        validation::validate_page_id("pages.ga_guidelines", &self.pages.ga_guidelines)?;
        validation::validate_page_id("pages.rfcs_done", &self.pages.rfcs_done)?;

        let (min, max) = self.message_range();
        validation::validate_positive_number("sending.min_messages", min, 1)?;
        if max <= min {
            return Err(BotError::InvalidConfigValueError {
                field: "sending.max_messages".to_string(),
                value: max.to_string(),
                reason: format!("Must be greater than min_messages ({})", min),
            });
        }

        validation::validate_range(
            "sending.catch_all_penalty",
            self.catch_all_penalty(),
            1.0,
            100.0,
        )?;

        validation::validate_path("runfiles.directory", self.runfile_directory())?;

        if self.wiki.username.is_some() != self.wiki.password.is_some() {
            return Err(BotError::ConfigValidationError {
                field: "wiki".to_string(),
                message: "username and password must be set together".to_string(),
            });
        }

        Ok(())
    }
}

impl ConfigProvider for BotConfig {
    fn subscriptions_page_id(&self) -> &str {
        &self.pages.subscriptions
    }

    fn sent_count_page_id(&self) -> &str {
        &self.pages.sent_count
    }

    fn ga_guidelines_page_id(&self) -> &str {
        &self.pages.ga_guidelines
    }

    fn rfcs_done_page_id(&self) -> &str {
        &self.pages.rfcs_done
    }

    fn message_range(&self) -> (usize, usize) {
        let sending = self.sending();
        (
            sending.min_messages.unwrap_or(5),
            sending.max_messages.unwrap_or(15),
        )
    }

    fn edit_interval(&self) -> Duration {
        Duration::from_secs(self.sending().edit_interval_seconds.unwrap_or(5))
    }

    fn max_edits_per_run(&self) -> Option<usize> {
        self.sending().max_edits_per_run
    }

    fn catch_all_penalty(&self) -> f64 {
        self.sending()
            .catch_all_penalty
            .unwrap_or(DEFAULT_CATCH_ALL_PENALTY)
    }

    fn dry_run(&self) -> bool {
        self.sending().dry_run.unwrap_or(false)
    }
}

impl Validate for BotConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
