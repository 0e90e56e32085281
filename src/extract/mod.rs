//! ダウンロード候補リンクの抽出
//!
//! - 静的抽出: レンダリング済みHTMLをDOMパターンでスキャン
//! - 対話的抽出: スクロール + クリックでダウンロードリンクを表示させる
//! - フォールバック: どちらも空なら緩いセレクタで静的抽出をやり直す

mod interactive;
mod static_scan;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

pub use interactive::InteractiveExtractor;
pub use static_scan::{
    is_svg_url, resolve_link, scan_html, SelectorProfile, SelectorRule, StaticExtractor,
};

use crate::traits::{LinkExtractor, PageDriver};
use crate::types::CandidateSet;

/// どの抽出方法をどう組み合わせるか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// 静的 → 空なら対話的
    #[default]
    Auto,
    Static,
    Interactive,
    /// 静的と対話的の和集合
    Both,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionStrategy::Auto => "auto",
            ExtractionStrategy::Static => "static",
            ExtractionStrategy::Interactive => "interactive",
            ExtractionStrategy::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ExtractionStrategy::Auto),
            "static" => Ok(ExtractionStrategy::Static),
            "interactive" => Ok(ExtractionStrategy::Interactive),
            "both" => Ok(ExtractionStrategy::Both),
            other => Err(format!(
                "unknown strategy '{}' (expected auto, static, interactive or both)",
                other
            )),
        }
    }
}

/// 戦略に従って抽出器を組み合わせる
pub struct LinkDiscovery {
    strategy: ExtractionStrategy,
    primary: Box<dyn LinkExtractor>,
    interactive: Box<dyn LinkExtractor>,
    fallback: Box<dyn LinkExtractor>,
}

impl LinkDiscovery {
    pub fn new(strategy: ExtractionStrategy) -> Self {
        Self::with_extractors(
            strategy,
            Box::new(StaticExtractor::standard()),
            Box::new(InteractiveExtractor::new()),
            Box::new(StaticExtractor::broad()),
        )
    }

    pub fn with_extractors(
        strategy: ExtractionStrategy,
        primary: Box<dyn LinkExtractor>,
        interactive: Box<dyn LinkExtractor>,
        fallback: Box<dyn LinkExtractor>,
    ) -> Self {
        Self {
            strategy,
            primary,
            interactive,
            fallback,
        }
    }

    /// 候補リンクを集める。見つからなくてもエラーにはしない。
    pub async fn discover(&self, page: &dyn PageDriver, base: &Url) -> CandidateSet {
        let mut links = match self.strategy {
            ExtractionStrategy::Auto => {
                let links = run(self.primary.as_ref(), page, base).await;
                if links.is_empty() {
                    info!("Trying interactive extraction method...");
                    run(self.interactive.as_ref(), page, base).await
                } else {
                    links
                }
            }
            ExtractionStrategy::Static => run(self.primary.as_ref(), page, base).await,
            ExtractionStrategy::Interactive => run(self.interactive.as_ref(), page, base).await,
            ExtractionStrategy::Both => {
                let mut links = run(self.primary.as_ref(), page, base).await;
                links.merge(run(self.interactive.as_ref(), page, base).await);
                links
            }
        };

        if links.is_empty() {
            info!("No links found, retrying with broader selectors...");
            links = run(self.fallback.as_ref(), page, base).await;
        }

        links
    }
}

async fn run(extractor: &dyn LinkExtractor, page: &dyn PageDriver, base: &Url) -> CandidateSet {
    match extractor.extract(page, base).await {
        Ok(links) => {
            info!("[{}] found {} potential SVG links", extractor.name(), links.len());
            links
        }
        Err(e) => {
            warn!("[{}] extraction failed: {}", extractor.name(), e);
            CandidateSet::new()
        }
    }
}

/// サイト自身のロゴ (`logo.svg`) を除外する
pub fn filter_site_assets(links: &mut CandidateSet) {
    links.retain(|link| {
        let is_logo = Url::parse(&link.url)
            .map(|u| {
                let path = u.path().to_ascii_lowercase();
                path == "/logo.svg" || path.ends_with("/logo.svg")
            })
            .unwrap_or_else(|_| link.url.eq_ignore_ascii_case("logo.svg"));
        if is_logo {
            info!("Skipping site logo: {}", link.url);
        }
        !is_logo
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScraperError;
    use crate::types::CandidateLink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::testing::FakePage;

    /// 固定の結果を返す抽出器
    struct Fixed {
        name: &'static str,
        urls: Vec<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl Fixed {
        fn boxed(
            name: &'static str,
            urls: Vec<&'static str>,
        ) -> (Box<dyn LinkExtractor>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let extractor: Box<dyn LinkExtractor> = Box::new(Fixed {
                name,
                urls,
                calls: Arc::clone(&calls),
            });
            (extractor, calls)
        }
    }

    #[async_trait]
    impl LinkExtractor for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(
            &self,
            _page: &dyn PageDriver,
            _base: &Url,
        ) -> Result<CandidateSet, ScraperError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.urls.iter().map(|u| CandidateLink::new(*u)).collect())
        }
    }

    fn base() -> Url {
        Url::parse("https://icons.example.com/").unwrap()
    }

    #[tokio::test]
    async fn test_auto_skips_interactive_when_static_finds_links() {
        let (primary, _) = Fixed::boxed("static", vec!["https://x/a.svg"]);
        let (interactive, interactive_calls) = Fixed::boxed("interactive", vec!["https://x/b.svg"]);
        let (fallback, fallback_calls) = Fixed::boxed("broad", vec!["https://x/c.svg"]);
        let discovery =
            LinkDiscovery::with_extractors(ExtractionStrategy::Auto, primary, interactive, fallback);

        let links = discovery.discover(&FakePage::new(""), &base()).await;
        assert_eq!(links.len(), 1);
        assert_eq!(interactive_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_broad_when_both_empty() {
        let (primary, _) = Fixed::boxed("static", vec![]);
        let (interactive, interactive_calls) = Fixed::boxed("interactive", vec![]);
        let (fallback, fallback_calls) = Fixed::boxed("broad", vec!["https://x/c.svg"]);
        let discovery =
            LinkDiscovery::with_extractors(ExtractionStrategy::Auto, primary, interactive, fallback);

        let links = discovery.discover(&FakePage::new(""), &base()).await;
        assert!(links.contains("https://x/c.svg"));
        assert_eq!(interactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_is_a_union_without_duplicates() {
        let (primary, _) = Fixed::boxed("static", vec!["https://x/a.svg", "https://x/b.svg"]);
        let (interactive, _) = Fixed::boxed("interactive", vec!["https://x/b.svg", "https://x/c.svg"]);
        let (fallback, _) = Fixed::boxed("broad", vec![]);
        let discovery =
            LinkDiscovery::with_extractors(ExtractionStrategy::Both, primary, interactive, fallback);

        let links = discovery.discover(&FakePage::new(""), &base()).await;
        assert_eq!(links.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_everywhere_is_not_an_error() {
        let (primary, _) = Fixed::boxed("static", vec![]);
        let (interactive, _) = Fixed::boxed("interactive", vec![]);
        let (fallback, _) = Fixed::boxed("broad", vec![]);
        let discovery =
            LinkDiscovery::with_extractors(ExtractionStrategy::Auto, primary, interactive, fallback);

        assert!(discovery.discover(&FakePage::new(""), &base()).await.is_empty());
    }

    #[test]
    fn test_filter_site_assets_drops_logo() {
        let mut links: CandidateSet = [
            "https://icons.example.com/logo.svg",
            "https://icons.example.com/static/LOGO.svg",
            "https://icons.example.com/show/company-logo.svg",
            "https://icons.example.com/show/cat.svg",
        ]
        .iter()
        .map(|u| CandidateLink::new(*u))
        .collect();

        filter_site_assets(&mut links);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://icons.example.com/show/company-logo.svg",
                "https://icons.example.com/show/cat.svg",
            ]
        );
    }

    #[test]
    fn test_strategy_parse_and_display() {
        for strategy in [
            ExtractionStrategy::Auto,
            ExtractionStrategy::Static,
            ExtractionStrategy::Interactive,
            ExtractionStrategy::Both,
        ] {
            assert_eq!(strategy.to_string().parse::<ExtractionStrategy>(), Ok(strategy));
        }
        assert!("magic".parse::<ExtractionStrategy>().is_err());
    }
}
