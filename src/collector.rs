//! コレクションページ1件分の処理全体
//!
//! セッション起動 → ページ遷移 → リンク抽出 → ダウンロード → セッション終了

use std::collections::HashSet;

use chrono::Utc;
use tracing::{info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::downloader::{Downloader, HttpFetcher};
use crate::error::ScraperError;
use crate::extract::{filter_site_assets, LinkDiscovery};
use crate::navigator::Navigator;
use crate::session::BrowserSession;
use crate::traits::PageDriver;
use crate::types::{CandidateLink, CollectionReport, PageReport};

/// 有効なリンクが無いページがこれだけ続いたらページ送りを止める
const MAX_EMPTY_PAGES: usize = 3;
const MAX_PAGES: u32 = 500;

/// ページ番号付きURLを作る（1ページ目は末尾スラッシュ付きの元URL）
///
/// 末尾が `/<数字>` のURLはその数字を置き換える。
pub fn build_page_url(base_url: &str, page_number: u32) -> String {
    let trimmed = base_url.trim_end_matches('/');
    let without_number = match trimmed.rsplit_once('/') {
        Some((head, tail))
            if !tail.is_empty()
                && tail.chars().all(|c| c.is_ascii_digit())
                && !head.ends_with('/') =>
        {
            head
        }
        _ => trimmed,
    };

    if page_number <= 1 {
        format!("{}/", without_number)
    } else {
        format!("{}/{}", without_number, page_number)
    }
}

pub struct SvgCollector {
    config: ScraperConfig,
}

impl SvgCollector {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// ブラウザを起動してコレクションを処理する。ブラウザは必ず閉じる。
    pub async fn run(&self, collection_url: &str) -> Result<CollectionReport, ScraperError> {
        parse_collection_url(collection_url)?;
        let session = BrowserSession::open(&self.config).await?;
        let result = self.collect_with(session.page(), collection_url).await;
        session.close().await;
        result
    }

    /// 準備済みのページでコレクションを処理する
    pub async fn collect_with(
        &self,
        page: &dyn PageDriver,
        collection_url: &str,
    ) -> Result<CollectionReport, ScraperError> {
        let collection = parse_collection_url(collection_url)?;
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        info!("Starting download from collection: {}", collection);
        let navigator = Navigator::new(&self.config);
        let discovery = LinkDiscovery::new(self.config.strategy);
        let mut report = CollectionReport::new(collection_url);
        let mut seen: HashSet<String> = HashSet::new();
        let mut empty_pages = 0;

        for page_number in 1..=MAX_PAGES {
            if let Some(max) = self.config.max_downloads {
                if report.succeeded() >= max {
                    info!("Reached maximum download limit of {}", max);
                    break;
                }
            }

            let page_url = if self.config.paginate {
                build_page_url(collection.as_str(), page_number)
            } else {
                collection.to_string()
            };
            info!("Processing page {}: {}", page_number, page_url);

            if let Err(e) = navigator.load(page, &page_url).await {
                // 1ページ目の失敗は致命的
                if page_number == 1 {
                    return Err(e);
                }
                warn!("Skipping page {}: {}", page_number, e);
                report.pages.push(PageReport {
                    url: page_url,
                    ..Default::default()
                });
                empty_pages += 1;
                if empty_pages >= MAX_EMPTY_PAGES {
                    info!("Stopping after {} consecutive empty pages", MAX_EMPTY_PAGES);
                    break;
                }
                continue;
            }
            navigator.wait_for_svg_content(page).await;
            if !self.config.page_load_wait.is_zero() {
                navigator
                    .wait_stable(page, self.config.page_load_wait * 5)
                    .await;
            }

            let base = match page.current_url().await {
                Ok(Some(current)) => Url::parse(&current).unwrap_or_else(|_| collection.clone()),
                _ => Url::parse(&page_url).unwrap_or_else(|_| collection.clone()),
            };

            let mut links = discovery.discover(page, &base).await;
            filter_site_assets(&mut links);
            // 前のページで見たリンクは数えない
            links.retain(|link| !seen.contains(&link.url));
            let links: Vec<CandidateLink> = links.into_vec();
            seen.extend(links.iter().map(|l| l.url.clone()));

            if links.is_empty() {
                info!("Page {} has no valid SVGs", page_number);
                report.pages.push(PageReport {
                    url: page_url,
                    ..Default::default()
                });
                if !self.config.paginate {
                    info!("No links found on collection page");
                    break;
                }
                empty_pages += 1;
                if empty_pages >= MAX_EMPTY_PAGES {
                    info!("Stopping after {} consecutive empty pages", MAX_EMPTY_PAGES);
                    break;
                }
                continue;
            }
            empty_pages = 0;
            info!("Found {} valid SVGs on page {}", links.len(), page_number);

            let cookies = page.cookies().await.unwrap_or_default();
            let fetcher = HttpFetcher::new(&self.config)?
                .with_referer(page_url.clone())
                .with_cookies(&cookies, &base);
            // 合成ファイル名の連番はページをまたいで続ける
            let downloader =
                Downloader::new(&self.config, fetcher).with_index_base(report.attempted());

            let remaining = self
                .config
                .max_downloads
                .map(|max| max.saturating_sub(report.succeeded()));
            let results = downloader.download_all(&links, remaining).await;

            let page_report = PageReport {
                url: page_url,
                candidates: links.len(),
                results,
            };
            info!(
                "Downloaded {}/{} SVGs from page {}",
                page_report.succeeded(),
                page_report.candidates,
                page_number
            );
            report.pages.push(page_report);

            if !self.config.paginate {
                break;
            }
        }

        report.finished_at = Utc::now();
        info!(
            "Collection download complete: downloaded {} of {} ({} failed)",
            report.succeeded(),
            report.candidates_found(),
            report.failed()
        );
        Ok(report)
    }
}

fn parse_collection_url(raw: &str) -> Result<Url, ScraperError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ScraperError::Config(format!("invalid collection URL {:?}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScraperError::Config(format!(
            "unsupported URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_build_page_url() {
        let base = "https://www.svgrepo.com/collection/company-logo/";
        assert_eq!(build_page_url(base, 1), base);
        assert_eq!(
            build_page_url(base, 2),
            "https://www.svgrepo.com/collection/company-logo/2"
        );
        assert_eq!(
            build_page_url("https://www.svgrepo.com/collection/company-logo/4", 5),
            "https://www.svgrepo.com/collection/company-logo/5"
        );
        assert_eq!(
            build_page_url("https://www.svgrepo.com/collection/company-logo/4/", 1),
            "https://www.svgrepo.com/collection/company-logo/"
        );
    }

    #[test]
    fn test_rejects_bad_collection_url() {
        assert!(matches!(
            parse_collection_url("not a url"),
            Err(ScraperError::Config(_))
        ));
        assert!(matches!(
            parse_collection_url("ftp://example.com/icons/"),
            Err(ScraperError::Config(_))
        ));
    }

    fn fast_config(dir: &TempDir) -> ScraperConfig {
        ScraperConfig::default()
            .with_download_dir(dir.path())
            .with_retry_delay(Duration::ZERO)
            .with_page_load_wait(Duration::ZERO)
            .with_download_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_zero_links_is_a_completed_run() {
        let dir = TempDir::new().unwrap();
        let page = FakePage::new("<html><body><p>nothing here</p></body></html>");
        let collector = SvgCollector::new(
            fast_config(&dir).with_strategy(crate::extract::ExtractionStrategy::Static),
        );

        let report = collector
            .collect_with(&page, "https://icons.example.com/collection/empty/")
            .await
            .unwrap();
        assert!(report.no_links_found());
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.pages.len(), 1);
    }

    #[tokio::test]
    async fn test_pagination_stops_after_empty_pages() {
        let dir = TempDir::new().unwrap();
        let page = FakePage::new("<html><body></body></html>");
        let collector = SvgCollector::new(
            fast_config(&dir)
                .with_paginate(true)
                .with_strategy(crate::extract::ExtractionStrategy::Static),
        );

        let report = collector
            .collect_with(&page, "https://icons.example.com/collection/empty/")
            .await
            .unwrap();
        assert_eq!(report.pages.len(), MAX_EMPTY_PAGES);
        assert_eq!(page.goto_calls(), MAX_EMPTY_PAGES);
    }

    #[tokio::test]
    async fn test_unreachable_first_page_is_fatal() {
        let dir = TempDir::new().unwrap();
        let page = FakePage::unreachable();
        let collector = SvgCollector::new(fast_config(&dir));

        let err = collector
            .collect_with(&page, "https://unreachable.invalid/collection/")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(page.goto_calls(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
