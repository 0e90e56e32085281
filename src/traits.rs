use async_trait::async_trait;
use url::Url;

use crate::error::ScraperError;
use crate::types::CandidateSet;

/// ブラウザページ操作の抽象
///
/// 実ブラウザでは [`crate::session::ChromiumPage`] が実装する。
/// セレクタは全て CSS セレクタ。
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// URLへ遷移
    async fn goto(&self, url: &str) -> Result<(), ScraperError>;

    /// レンダリング済みHTML
    async fn content(&self) -> Result<String, ScraperError>;

    /// JavaScriptを評価して結果をJSONで返す
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScraperError>;

    /// セレクタに一致する要素数
    async fn count(&self, selector: &str) -> Result<usize, ScraperError>;

    /// セレクタに一致する index 番目の要素をクリック
    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ScraperError>;

    /// セレクタに一致する最初の要素の属性値
    async fn first_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, ScraperError>;

    /// 表示中の最初の要素をクリックできたら true
    async fn click_first_visible(&self, selector: &str) -> Result<bool, ScraperError>;

    /// 要素の出現を待機。タイムアウトしたら false
    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: std::time::Duration,
    ) -> Result<bool, ScraperError>;

    /// 現在のURL
    async fn current_url(&self) -> Result<Option<String>, ScraperError> {
        Ok(None)
    }

    /// (name, value) のクッキー一覧
    async fn cookies(&self) -> Result<Vec<(String, String)>, ScraperError> {
        Ok(Vec::new())
    }

    /// デバッグ用のフルページスクリーンショット（base64 PNG）
    async fn screenshot_base64(&self) -> Result<Option<String>, ScraperError> {
        Ok(None)
    }
}

/// ダウンロード候補リンクの抽出戦略
#[async_trait]
pub trait LinkExtractor: Send + Sync {
    /// ログ用の名前
    fn name(&self) -> &'static str;

    /// 現在のページから候補リンクを抽出
    async fn extract(&self, page: &dyn PageDriver, base: &Url)
        -> Result<CandidateSet, ScraperError>;
}
