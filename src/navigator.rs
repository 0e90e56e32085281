//! ページ遷移（リトライ・ブロック検出付き）

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::PageDriver;

/// ボット検出を示唆するページ内文字列（小文字で比較）
const BLOCK_MARKERS: &[&str] = &["captcha", "blocked", "access denied"];

/// SVG要素の出現待機に使うセレクタ
pub const SVG_READY_SELECTOR: &str = r#"svg, img[src*=".svg"], a[href*=".svg"]"#;
const SVG_READY_TIMEOUT_MS: u64 = 10_000;

/// ページ安定判定のインターバル（ミリ秒）
const PAGE_STABLE_CHECK_INTERVAL_MS: u64 = 300;
const REQUIRED_STABLE_CHECKS: u32 = 3;

/// テキスト中に含まれるブロック検出マーカーを返す
pub fn detect_block_markers(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    BLOCK_MARKERS
        .iter()
        .copied()
        .filter(|marker| lower.contains(marker))
        .collect()
}

pub struct Navigator {
    max_retries: u32,
    retry_delay: Duration,
    page_load_wait: Duration,
    debug: bool,
}

impl Navigator {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            page_load_wait: config.page_load_wait,
            debug: config.debug,
        }
    }

    /// URLを読み込む。全試行が失敗したら `ScraperError::Navigation`。
    ///
    /// 失敗時は `retry_delay * 試行回数` だけ待って再試行する。
    /// ブロック検出は警告のみで処理は続行する。
    pub async fn load(&self, page: &dyn PageDriver, url: &str) -> Result<(), ScraperError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            info!(
                "Navigating to {} (attempt {}/{})",
                url, attempt, self.max_retries
            );

            match page.goto(url).await {
                Ok(()) => {
                    if !self.page_load_wait.is_zero() {
                        sleep(self.page_load_wait).await;
                    }
                    self.check_blocking(page).await;
                    info!("Successfully navigated to page");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!("Navigation attempt {} failed: {}", attempt, e);
                    if attempt < self.max_retries {
                        let backoff = self.retry_delay * attempt;
                        debug!("Retrying navigation in {:?}", backoff);
                        sleep(backoff).await;
                    }
                }
            }
        }

        error!(
            "Failed to navigate to {} after {} attempts",
            url, self.max_retries
        );
        Err(ScraperError::Navigation {
            url: url.to_string(),
            attempts: self.max_retries,
            message: last_error,
        })
    }

    /// SVGらしき要素の出現を待つ。タイムアウトは警告のみ。
    pub async fn wait_for_svg_content(&self, page: &dyn PageDriver) {
        match page
            .wait_for_selector(
                SVG_READY_SELECTOR,
                Duration::from_millis(SVG_READY_TIMEOUT_MS),
            )
            .await
        {
            Ok(true) => debug!("SVG elements present"),
            Ok(false) => warn!("Timeout waiting for SVG elements"),
            Err(e) => warn!("Error waiting for SVG elements: {}", e),
        }
    }

    /// DOMのサイズが変わらなくなるまで待機
    pub async fn wait_stable(&self, page: &dyn PageDriver, timeout: Duration) {
        let start = tokio::time::Instant::now();
        let mut last_len: Option<u64> = None;
        let mut stable_count = 0;

        while start.elapsed() < timeout {
            match page
                .evaluate("document.documentElement.outerHTML.length")
                .await
            {
                Ok(val) => {
                    let current = val.as_u64().unwrap_or(0);
                    match last_len {
                        Some(last) if last == current => {
                            stable_count += 1;
                            if stable_count >= REQUIRED_STABLE_CHECKS {
                                debug!("Page stable after {:?}", start.elapsed());
                                return;
                            }
                        }
                        _ => stable_count = 0,
                    }
                    last_len = Some(current);
                }
                Err(e) => {
                    debug!("Page stable check error: {}", e);
                    stable_count = 0;
                }
            }
            sleep(Duration::from_millis(PAGE_STABLE_CHECK_INTERVAL_MS)).await;
        }

        warn!(
            "Page stable timeout after {:?}, proceeding anyway",
            start.elapsed()
        );
    }

    async fn check_blocking(&self, page: &dyn PageDriver) {
        let content = match page.content().await {
            Ok(content) => content,
            Err(e) => {
                debug!("Could not read page content for block check: {}", e);
                return;
            }
        };

        let markers = detect_block_markers(&content);
        if markers.is_empty() {
            return;
        }
        warn!("Potential bot detection on page: {:?}", markers);

        if self.debug {
            match page.screenshot_base64().await {
                Ok(Some(encoded)) => {
                    debug!("Blocked page screenshot: data:image/png;base64,{}", encoded)
                }
                Ok(None) => {}
                Err(e) => debug!("Failed to capture screenshot: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    fn fast_config(max_retries: u32) -> ScraperConfig {
        ScraperConfig::default()
            .with_max_retries(max_retries)
            .with_retry_delay(Duration::ZERO)
            .with_page_load_wait(Duration::ZERO)
    }

    #[test]
    fn test_detect_block_markers_case_insensitive() {
        assert_eq!(
            detect_block_markers("<h1>Please complete the CAPTCHA</h1>"),
            vec!["captcha"]
        );
        assert_eq!(
            detect_block_markers("Access Denied - you have been Blocked"),
            vec!["blocked", "access denied"]
        );
        assert!(detect_block_markers("<svg></svg> nice icons").is_empty());
    }

    #[tokio::test]
    async fn test_load_succeeds_after_transient_failures() {
        let page = FakePage::new("<html><body>ok</body></html>").failing_gotos(2);
        let navigator = Navigator::new(&fast_config(3));

        navigator
            .load(&page, "https://example.com/collection/")
            .await
            .unwrap();
        assert_eq!(page.goto_calls(), 3);
    }

    #[tokio::test]
    async fn test_load_exhausts_retries() {
        let page = FakePage::unreachable();
        let navigator = Navigator::new(&fast_config(3));

        let err = navigator
            .load(&page, "https://unreachable.invalid/")
            .await
            .unwrap_err();
        match err {
            ScraperError::Navigation { url, attempts, .. } => {
                assert_eq!(url, "https://unreachable.invalid/");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(page.goto_calls(), 3);
    }

    #[tokio::test]
    async fn test_load_continues_when_blocked() {
        let page = FakePage::new("<html><body>Access denied</body></html>");
        let navigator = Navigator::new(&fast_config(3));

        navigator.load(&page, "https://example.com/").await.unwrap();
        assert_eq!(page.goto_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_between_attempts() {
        let page = FakePage::unreachable();
        let config = fast_config(3).with_retry_delay(Duration::from_secs(2));
        let navigator = Navigator::new(&config);

        let start = tokio::time::Instant::now();
        let _ = navigator.load(&page, "https://unreachable.invalid/").await;
        // 2s * 1 + 2s * 2（最終試行後は待たない）
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stable_returns_once_dom_settles() {
        let page = FakePage::new("<html><body><svg></svg></body></html>");
        let navigator = Navigator::new(&fast_config(3));

        let start = tokio::time::Instant::now();
        navigator
            .wait_stable(&page, Duration::from_secs(30))
            .await;
        // 初回計測 + 安定3回
        assert_eq!(
            start.elapsed(),
            Duration::from_millis(PAGE_STABLE_CHECK_INTERVAL_MS * 3)
        );
    }
}
