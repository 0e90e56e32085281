//! スクロールとクリックでダウンロードリンクを表示させる抽出

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::static_scan::resolve_link;
use crate::error::ScraperError;
use crate::traits::{LinkExtractor, PageDriver};
use crate::types::{CandidateLink, CandidateSet};

/// SVGアイテムのコンテナ（最初に一致したものだけを使う）
pub const ITEM_SELECTORS: &[&str] = &[
    ".svg-item",
    ".icon-item",
    "div[class*=\"svg\"]",
    "div[class*=\"icon\"]",
    "a[href*=\"/svg/\"]",
    "a[href*=\"/download/\"]",
];

/// クリック後に現れるダウンロード操作
pub const DOWNLOAD_SELECTORS: &[&str] = &[
    "a[download]",
    "button[class*=\"download\"]",
    "a[class*=\"download\"]",
    "a[href*=\".svg\"]",
];

/// モーダルを閉じるボタン
pub const CLOSE_SELECTORS: &[&str] = &[
    "button[class*=\"close\"]",
    ".modal-close",
    "[aria-label=\"Close\"]",
];

const LINK_ATTRIBUTES: &[&str] = &["href", "data-href", "data-url"];

/// タイムアウト回避のため1セレクタあたりのクリック数を制限
const MAX_ITEMS_PER_SELECTOR: usize = 50;
/// 無限スクロール対策の上限
const MAX_SCROLL_ROUNDS: usize = 50;

const SCROLL_HEIGHT_SCRIPT: &str = "document.body ? document.body.scrollHeight : 0";
const SCROLL_TO_BOTTOM_SCRIPT: &str =
    "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)";

pub struct InteractiveExtractor {
    reveal_wait: Duration,
    scroll_wait: Duration,
    max_items: usize,
}

impl Default for InteractiveExtractor {
    fn default() -> Self {
        Self {
            reveal_wait: Duration::from_millis(500),
            scroll_wait: Duration::from_secs(1),
            max_items: MAX_ITEMS_PER_SELECTOR,
        }
    }
}

impl InteractiveExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(mut self, reveal_wait: Duration, scroll_wait: Duration) -> Self {
        self.reveal_wait = reveal_wait;
        self.scroll_wait = scroll_wait;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// 高さが変わらなくなるまで最下部へスクロール（遅延読み込み対策）
    ///
    /// 実行したスクロール回数を返す。
    pub async fn scroll_to_bottom(&self, page: &dyn PageDriver) -> usize {
        let mut previous = match page.evaluate(SCROLL_HEIGHT_SCRIPT).await {
            Ok(v) => v.as_u64().unwrap_or(0),
            Err(e) => {
                warn!("Error during scrolling: {}", e);
                return 0;
            }
        };

        for round in 1..=MAX_SCROLL_ROUNDS {
            if let Err(e) = page.evaluate(SCROLL_TO_BOTTOM_SCRIPT).await {
                warn!("Error during scrolling: {}", e);
                return round - 1;
            }
            if !self.scroll_wait.is_zero() {
                sleep(self.scroll_wait).await;
            }

            let current = match page.evaluate(SCROLL_HEIGHT_SCRIPT).await {
                Ok(v) => v.as_u64().unwrap_or(0),
                Err(e) => {
                    warn!("Error during scrolling: {}", e);
                    return round;
                }
            };
            debug!("Scroll round {}: height {} -> {}", round, previous, current);

            if current == previous {
                return round;
            }
            previous = current;
        }

        warn!("Stopped scrolling after {} rounds", MAX_SCROLL_ROUNDS);
        MAX_SCROLL_ROUNDS
    }

    /// 表示されたダウンロード操作からリンクを読む
    async fn read_revealed_link(
        &self,
        page: &dyn PageDriver,
        base: &Url,
    ) -> Option<CandidateLink> {
        for selector in DOWNLOAD_SELECTORS {
            for attribute in LINK_ATTRIBUTES {
                match page.first_attribute(selector, attribute).await {
                    Ok(Some(raw)) => {
                        if let Some(url) = resolve_link(&raw, base) {
                            let hint = page
                                .first_attribute(selector, "download")
                                .await
                                .ok()
                                .flatten();
                            return Some(
                                CandidateLink::new(url.to_string()).with_filename_hint(hint),
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Reading {} from {} failed: {}", attribute, selector, e),
                }
            }
        }
        None
    }

    async fn dismiss_modal(&self, page: &dyn PageDriver) {
        for selector in CLOSE_SELECTORS {
            match page.click_first_visible(selector).await {
                Ok(true) => {
                    debug!("Closed modal via {}", selector);
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!("Close via {} failed: {}", selector, e),
            }
        }
    }
}

#[async_trait]
impl LinkExtractor for InteractiveExtractor {
    fn name(&self) -> &'static str {
        "interactive"
    }

    async fn extract(
        &self,
        page: &dyn PageDriver,
        base: &Url,
    ) -> Result<CandidateSet, ScraperError> {
        info!("Scrolling to load all content...");
        self.scroll_to_bottom(page).await;

        let mut links = CandidateSet::new();
        let origin = page.current_url().await.ok().flatten();

        for selector in ITEM_SELECTORS {
            let count = match page.count(selector).await {
                Ok(count) => count,
                Err(e) => {
                    debug!("No elements found for selector {}: {}", selector, e);
                    continue;
                }
            };
            if count == 0 {
                continue;
            }
            info!("Found {} elements with selector: {}", count, selector);

            for index in 0..count.min(self.max_items) {
                if let Err(e) = page.click_nth(selector, index).await {
                    debug!("Error processing element {}: {}", index, e);
                    continue;
                }
                if !self.reveal_wait.is_zero() {
                    sleep(self.reveal_wait).await;
                }

                // アンカー要素のクリックで詳細ページへ遷移した場合
                let navigated_to = match (&origin, page.current_url().await.ok().flatten()) {
                    (Some(origin), Some(current)) if &current != origin => Some(current),
                    _ => None,
                };
                let link_base = navigated_to
                    .as_deref()
                    .and_then(|current| Url::parse(current).ok())
                    .unwrap_or_else(|| base.clone());

                if let Some(link) = self.read_revealed_link(page, &link_base).await {
                    debug!("Revealed link: {}", link.url);
                    links.insert(link);
                }

                match (&navigated_to, &origin) {
                    (Some(current), Some(origin)) => {
                        debug!("Click navigated to {}, returning to {}", current, origin);
                        if let Err(e) = page.goto(origin).await {
                            warn!("Could not return to collection page: {}", e);
                            return Ok(links);
                        }
                    }
                    _ => self.dismiss_modal(page).await,
                }
            }

            // 1つのセレクタで見つかれば他は試さない
            break;
        }

        info!("Found {} SVG links via interactive method", links.len());
        Ok(links)
    }
}
