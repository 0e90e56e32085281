use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {url} ({attempts}回試行): {message}")]
    Navigation {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("ダウンロードエラー: {0}")]
    Download(String),

    #[error("HTTPエラー: status={status} url={url}")]
    Http { status: u16, url: String },

    #[error("SVGではないコンテンツ: {0}")]
    InvalidContent(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),
}

impl ScraperError {
    /// 実行全体を中断すべきエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScraperError::BrowserInit(_) | ScraperError::Navigation { .. } | ScraperError::Config(_)
        )
    }

    /// ダウンロードループで再試行する価値があるか
    pub fn is_retryable(&self) -> bool {
        match self {
            ScraperError::Download(_) | ScraperError::Timeout(_) => true,
            ScraperError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ScraperError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ScraperError::Timeout(e.to_string());
        }
        match e.status() {
            Some(status) => ScraperError::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ScraperError::Download(e.to_string()),
        }
    }
}
