//! ブラウザセッション管理
//!
//! Chromium を起動し、フィンガープリント偽装を適用したページを1枚だけ持つ。

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::PageDriver;

/// `navigator.webdriver` をページスクリプトから隠す
const HIDE_WEBDRIVER_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined
    });
"#;

/// 要素出現ポーリング間隔（ミリ秒）
const SELECTOR_POLL_INTERVAL_MS: u64 = 250;

/// Chromeバイナリの場所を決定する
///
/// 設定値 → `CHROME_PATH` / `CHROMIUM_PATH` → PATH 上の既知の名前。
/// 見つからなければ chromiumoxide の自動検出に任せる。
pub fn resolve_chrome_path(config: &ScraperConfig) -> Option<PathBuf> {
    if let Some(path) = &config.chrome_path {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH")) {
        return Some(PathBuf::from(path));
    }

    ["google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Chromium ブラウザセッション
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: ChromiumPage,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    /// ブラウザを起動してページを1枚準備する
    pub async fn open(config: &ScraperConfig) -> Result<Self, ScraperError> {
        info!("Starting browser (headless={})...", config.headless);

        // ユニークなユーザーデータディレクトリを生成
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("svg-scraper-{}", unique_id));

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(config.viewport.width, config.viewport.height)
            .request_timeout(config.default_timeout);

        if let Some(chrome_path) = resolve_chrome_path(config) {
            debug!("Using browser executable: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--lang={}", config.locale));

        if config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // ハンドラータスクを起動
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {:?}", e);
                }
            }
        });

        let page = match prepare_page(&browser, config).await {
            Ok(page) => page,
            Err(e) => {
                // 起動済みのプロセスを残さない
                if let Err(close_err) = browser.close().await {
                    debug!("Failed to close browser after setup error: {}", close_err);
                }
                handler_task.abort();
                let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
                return Err(e);
            }
        };

        info!("Browser started successfully");
        Ok(Self {
            browser,
            handler_task,
            page: ChromiumPage::new(page, config.slow_mo, config.default_timeout),
            user_data_dir,
        })
    }

    pub fn page(&self) -> &ChromiumPage {
        &self.page
    }

    /// ページとブラウザを閉じる。失敗はログのみ。
    pub async fn close(mut self) {
        info!("Closing browser...");

        if let Err(e) = self.page.page.close().await {
            debug!("Failed to close page: {}", e);
        }
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Failed to wait for browser process: {}", e);
        }
        self.handler_task.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(
                "Failed to remove profile dir {}: {}",
                self.user_data_dir.display(),
                e
            );
        }

        info!("Browser closed");
    }
}

async fn prepare_page(browser: &Browser, config: &ScraperConfig) -> Result<Page, ScraperError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
    apply_fingerprint(&page, config).await?;
    Ok(page)
}

/// UA・ビューポート・ロケール・タイムゾーン・webdriverフラグを偽装
async fn apply_fingerprint(page: &Page, config: &ScraperConfig) -> Result<(), ScraperError> {
    let user_agent = SetUserAgentOverrideParams::builder()
        .user_agent(config.user_agent.clone())
        .accept_language(config.locale.clone())
        .build()
        .map_err(|e| ScraperError::BrowserInit(format!("UA設定エラー: {}", e)))?;
    page.execute(user_agent)
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("UA設定エラー: {}", e)))?;

    page.execute(SetDeviceMetricsOverrideParams::new(
        i64::from(config.viewport.width),
        i64::from(config.viewport.height),
        1.0,
        false,
    ))
    .await
    .map_err(|e| ScraperError::BrowserInit(format!("ビューポート設定エラー: {}", e)))?;

    page.execute(SetLocaleOverrideParams {
        locale: Some(config.locale.clone()),
    })
    .await
    .map_err(|e| ScraperError::BrowserInit(format!("ロケール設定エラー: {}", e)))?;

    page.execute(SetTimezoneOverrideParams::new(config.timezone.clone()))
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("タイムゾーン設定エラー: {}", e)))?;

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER_SCRIPT))
        .await
        .map_err(|e| ScraperError::BrowserInit(format!("初期化スクリプト設定エラー: {}", e)))?;

    debug!(
        "Fingerprint applied: ua={}, viewport={}x{}, locale={}, timezone={}",
        config.user_agent,
        config.viewport.width,
        config.viewport.height,
        config.locale,
        config.timezone
    );
    Ok(())
}

/// chromiumoxide の `Page` を [`PageDriver`] として使うラッパー
///
/// 入力操作（遷移・クリック・スクリプト実行）の前に `slow_mo` だけ待つ。
pub struct ChromiumPage {
    page: Page,
    slow_mo: Duration,
    timeout: Duration,
}

impl ChromiumPage {
    pub fn new(page: Page, slow_mo: Duration, timeout: Duration) -> Self {
        Self {
            page,
            slow_mo,
            timeout,
        }
    }

    async fn pace(&self) {
        if !self.slow_mo.is_zero() {
            sleep(self.slow_mo).await;
        }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, ScraperError>
    where
        F: Future<Output = Result<T, ScraperError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ScraperError::Timeout(format!("{} ({:?})", what, self.timeout)))?
    }

    async fn eval_value(&self, script: &str) -> Result<serde_json::Value, ScraperError> {
        let result = self
            .bounded("evaluate", async {
                self.page
                    .evaluate(script)
                    .await
                    .map_err(|e| ScraperError::JavaScript(e.to_string()))
            })
            .await?;
        // undefined は Null 扱い
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        self.pace().await;
        self.bounded("goto", async {
            self.page.goto(url).await.map_err(|e| ScraperError::Navigation {
                url: url.to_string(),
                attempts: 1,
                message: e.to_string(),
            })?;
            Ok(())
        })
        .await
    }

    async fn content(&self) -> Result<String, ScraperError> {
        self.bounded("content", async {
            self.page
                .content()
                .await
                .map_err(|e| ScraperError::JavaScript(e.to_string()))
        })
        .await
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScraperError> {
        self.pace().await;
        self.eval_value(script).await
    }

    async fn count(&self, selector: &str) -> Result<usize, ScraperError> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(selector)
        );
        let value = self.eval_value(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ScraperError> {
        self.pace().await;
        self.bounded("click", async {
            let elements = self
                .page
                .find_elements(selector)
                .await
                .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?;
            let element = elements.get(index).ok_or_else(|| {
                ScraperError::ElementNotFound(format!("{} [{}]", selector, index))
            })?;
            element
                .click()
                .await
                .map_err(|e| ScraperError::JavaScript(format!("click {}: {}", selector, e)))?;
            Ok(())
        })
        .await
    }

    async fn first_attribute(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, ScraperError> {
        let script = format!(
            r#"
            (() => {{
                const el = document.querySelector({});
                return el ? el.getAttribute({}) : null;
            }})()
            "#,
            js_string(selector),
            js_string(attribute)
        );
        let value = self.eval_value(&script).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click_first_visible(&self, selector: &str) -> Result<bool, ScraperError> {
        self.pace().await;
        let script = format!(
            r#"
            (() => {{
                const elements = document.querySelectorAll({});
                for (const el of elements) {{
                    const rect = el.getBoundingClientRect();
                    const style = window.getComputedStyle(el);
                    if (rect.width > 0 && rect.height > 0
                        && style.visibility !== 'hidden' && style.display !== 'none') {{
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()
            "#,
            js_string(selector)
        );
        let value = self.eval_value(&script).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, ScraperError> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match self.count(selector).await {
                Ok(n) if n > 0 => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!("Selector wait check error: {}", e),
            }
            sleep(Duration::from_millis(SELECTOR_POLL_INTERVAL_MS)).await;
        }
        Ok(false)
    }

    async fn current_url(&self) -> Result<Option<String>, ScraperError> {
        self.page
            .url()
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    async fn cookies(&self) -> Result<Vec<(String, String)>, ScraperError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(cookies.into_iter().map(|c| (c.name, c.value)).collect())
    }

    async fn screenshot_base64(&self) -> Result<Option<String>, ScraperError> {
        let png = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        Ok(Some(base64::engine::general_purpose::STANDARD.encode(png)))
    }
}
