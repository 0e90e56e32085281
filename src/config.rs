use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ScraperError;
use crate::extract::ExtractionStrategy;

/// 実在するデスクトップChromeに見せかけるUA
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub download_dir: PathBuf,
    /// CDP操作1回あたりのタイムアウト
    pub default_timeout: Duration,
    /// ページ読み込み後の待機時間
    pub page_load_wait: Duration,
    pub headless: bool,
    /// 入力操作ごとに挟む遅延
    pub slow_mo: Duration,
    pub max_retries: u32,
    /// リトライ間隔の基準値（試行回数倍）
    pub retry_delay: Duration,
    /// ダウンロード間の待機時間
    pub download_delay: Duration,
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
    pub timezone: String,
    /// 成功したダウンロード数の上限（None: 無制限）
    pub max_downloads: Option<usize>,
    pub strategy: ExtractionStrategy,
    pub paginate: bool,
    pub chrome_path: Option<PathBuf>,
    pub debug: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloaded_svgs"),
            default_timeout: Duration::from_millis(30_000),
            page_load_wait: Duration::from_millis(2_000),
            headless: true,
            slow_mo: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            download_delay: Duration::from_millis(500),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: Viewport::default(),
            locale: "en-US".to_string(),
            timezone: "America/New_York".to_string(),
            max_downloads: None,
            strategy: ExtractionStrategy::Auto,
            paginate: false,
            chrome_path: None,
            debug: false,
        }
    }
}

impl ScraperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 環境変数から設定を読み込む（起動時に1回だけ）
    pub fn from_env() -> Result<Self, ScraperError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー検索関数から設定を構築する。未設定のキーはデフォルト値のまま。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScraperError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DEFAULT_TIMEOUT")? {
            config.default_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PAGE_LOAD_WAIT")? {
            config.page_load_wait = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("HEADLESS") {
            config.headless = parse_bool("HEADLESS", &raw)?;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SLOW_MO")? {
            config.slow_mo = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32, _>(&lookup, "MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RETRY_DELAY")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DOWNLOAD_DELAY")? {
            config.download_delay = Duration::from_millis(ms);
        }
        if let Some(ua) = lookup("USER_AGENT") {
            config.user_agent = ua;
        }
        if let Some(path) = lookup("CHROME_PATH").or_else(|| lookup("CHROMIUM_PATH")) {
            config.chrome_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.max_retries == 0 {
            return Err(ScraperError::Config("MAX_RETRIES must be at least 1".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ScraperError::Config("USER_AGENT must not be empty".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ScraperError::Config("viewport must be non-zero".into()));
        }
        Ok(())
    }

    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_slow_mo(mut self, slow_mo: Duration) -> Self {
        self.slow_mo = slow_mo;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_page_load_wait(mut self, wait: Duration) -> Self {
        self.page_load_wait = wait;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    /// `Some(0)` は無制限として扱う
    pub fn with_max_downloads(mut self, max_downloads: Option<usize>) -> Self {
        self.max_downloads = max_downloads.filter(|&n| n > 0);
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_paginate(mut self, paginate: bool) -> Self {
        self.paginate = paginate;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ScraperError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ScraperError::Config(format!("{}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ScraperError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ScraperError::Config(format!("{}={:?}: expected a boolean", key, raw))),
    }
}
