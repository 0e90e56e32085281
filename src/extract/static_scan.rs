//! レンダリング済みHTMLの静的スキャン

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::ScraperError;
use crate::traits::{LinkExtractor, PageDriver};
use crate::types::{CandidateLink, CandidateSet};

/// URLを探す属性（先に見つかったものを採用）
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "data-href",
    "data-url",
    "data-download-url",
    "data-svg",
    "data-svg-url",
    "data-src",
    "src",
];

/// 1つのセレクタと、そこからURLを取り出す規則
#[derive(Debug, Clone)]
pub struct SelectorRule {
    pub selector: &'static str,
    pub attributes: &'static [&'static str],
    /// パスが `.svg` で終わるURLだけを採用する
    pub require_svg: bool,
}

impl SelectorRule {
    const fn svg_only(selector: &'static str, attributes: &'static [&'static str]) -> Self {
        Self {
            selector,
            attributes,
            require_svg: true,
        }
    }

    const fn any(selector: &'static str, attributes: &'static [&'static str]) -> Self {
        Self {
            selector,
            attributes,
            require_svg: false,
        }
    }
}

/// 静的スキャンで使うセレクタ群
#[derive(Debug, Clone)]
pub struct SelectorProfile {
    pub name: &'static str,
    pub rules: Vec<SelectorRule>,
}

impl SelectorProfile {
    /// 通常のセレクタ群
    pub fn standard() -> Self {
        Self {
            name: "standard",
            rules: vec![
                // .svg で終わるリンク・プレビュー画像
                SelectorRule::svg_only("a[href]", &["href"]),
                SelectorRule::svg_only("img[src]", &["src"]),
                // ダウンロード用のリンク・ボタン
                SelectorRule::any("a[download]", &["href"]),
                SelectorRule::any("a[class*=\"download\"]", &["href"]),
                SelectorRule::any("a[href*=\"download\"]", &["href"]),
                SelectorRule::any("button[class*=\"download\"]", URL_ATTRIBUTES),
                SelectorRule::any("a[class*=\"svg\"][download]", &["href"]),
                // SVGのURLを埋め込んだdata属性
                SelectorRule::any("[data-svg]", &["data-svg"]),
                SelectorRule::any("[data-svg-url]", &["data-svg-url"]),
                SelectorRule::any("[data-download-url]", &["data-download-url"]),
                SelectorRule::svg_only("[data-src]", &["data-src"]),
                SelectorRule::svg_only("[data-url]", &["data-url"]),
            ],
        }
    }

    /// 何も見つからなかった時の緩いセレクタ群
    pub fn broad() -> Self {
        Self {
            name: "broad",
            rules: vec![
                SelectorRule::any("a[href*=\"svg\"]", &["href"]),
                SelectorRule::any("a[href*=\"icon\"]", &["href"]),
                SelectorRule::any("a[href*=\"download\"]", &["href"]),
                SelectorRule::any("[class*=\"icon\"] a[href]", &["href"]),
                SelectorRule::any("img[src*=\"svg\"]", &["src"]),
                SelectorRule::any("object[data*=\".svg\"]", &["data"]),
                SelectorRule::any("embed[src*=\".svg\"]", &["src"]),
                SelectorRule::any("link[href*=\".svg\"]", &["href"]),
                SelectorRule::any("[data-src*=\"svg\"]", &["data-src"]),
                SelectorRule::any("[data-original*=\"svg\"]", &["data-original"]),
                SelectorRule::any("source[srcset*=\".svg\"]", &["srcset"]),
                SelectorRule::svg_only("[style*=\".svg\"]", &["style"]),
            ],
        }
    }
}

/// HTMLから候補リンクを抽出（相対URLは base で解決）
pub fn scan_html(html: &str, base: &Url, profile: &SelectorProfile) -> CandidateSet {
    let document = Html::parse_document(html);
    let mut links = CandidateSet::new();

    for rule in &profile.rules {
        let selector = match Selector::parse(rule.selector) {
            Ok(selector) => selector,
            Err(e) => {
                warn!("Invalid selector {}: {:?}", rule.selector, e);
                continue;
            }
        };

        for element in document.select(&selector) {
            let value = element.value();
            let raw = rule
                .attributes
                .iter()
                .filter_map(|attr| value.attr(attr).map(|raw| (*attr, raw)))
                .find_map(|(attr, raw)| extract_url_token(attr, raw));

            let Some(url) = raw.and_then(|raw| resolve_link(&raw, base)) else {
                continue;
            };
            if rule.require_svg && !is_svg_url(&url) {
                continue;
            }

            let hint = value.attr("download").map(str::to_string);
            if links.insert(CandidateLink::new(url.to_string()).with_filename_hint(hint)) {
                debug!("[{}] {} -> {}", profile.name, rule.selector, url);
            }
        }
    }

    links
}

/// 属性値からURL部分を取り出す
fn extract_url_token(attribute: &str, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match attribute {
        // background-image: url('...')
        "style" => {
            let start = raw.find("url(")?;
            let rest = &raw[start + 4..];
            let end = rest.find(')')?;
            let inner = rest[..end].trim().trim_matches(|c| c == '"' || c == '\'');
            Some(inner.to_string())
        }
        // "a.svg 1x, b.svg 2x" の先頭だけ
        "srcset" => raw
            .split(',')
            .next()?
            .split_whitespace()
            .next()
            .map(str::to_string),
        _ => Some(raw.to_string()),
    }
}

/// リンクを絶対URLに解決する。ダウンロード対象外のスキームは None。
pub fn resolve_link(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// パスが `.svg` で終わるか
pub fn is_svg_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".svg")
}

/// DOMパターンによる静的抽出
pub struct StaticExtractor {
    profile: SelectorProfile,
}

impl StaticExtractor {
    pub fn new(profile: SelectorProfile) -> Self {
        Self { profile }
    }

    pub fn standard() -> Self {
        Self::new(SelectorProfile::standard())
    }

    pub fn broad() -> Self {
        Self::new(SelectorProfile::broad())
    }
}

#[async_trait]
impl LinkExtractor for StaticExtractor {
    fn name(&self) -> &'static str {
        self.profile.name
    }

    async fn extract(
        &self,
        page: &dyn PageDriver,
        base: &Url,
    ) -> Result<CandidateSet, ScraperError> {
        let html = page.content().await?;
        Ok(scan_html(&html, base, &self.profile))
    }
}
