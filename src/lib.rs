//! SVGコレクションスクレイパーライブラリ
//!
//! - ヘッドレスChromeでコレクションページを開く（ボット検出回避の偽装付き）
//! - 静的スキャン / クリックによる表示でSVGのダウンロードリンクを抽出
//! - リトライ付きでSVGをローカルディレクトリに保存
//!
//! # 使用例
//!
//! ```rust,ignore
//! use svg_scraper::{ScraperConfig, SvgCollector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ScraperConfig::from_env()
//!         .unwrap()
//!         .with_download_dir("./svgs")
//!         .with_max_downloads(Some(10));
//!
//!     let collector = SvgCollector::new(config);
//!     let report = collector
//!         .run("https://www.svgrepo.com/collection/company-logo/")
//!         .await
//!         .unwrap();
//!     println!("downloaded {} of {}", report.succeeded(), report.candidates_found());
//! }
//! ```
//!
//! # tower::Service として使う
//!
//! ```rust,ignore
//! use svg_scraper::{CollectRequest, ScraperService};
//! use tower::Service;
//!
//! let mut service = ScraperService::default();
//! let report = service
//!     .call(CollectRequest::new("https://www.svgrepo.com/collection/company-logo/"))
//!     .await?;
//! ```

pub mod collector;
pub mod config;
pub mod doctor;
pub mod downloader;
pub mod error;
pub mod extract;
pub mod navigator;
pub mod service;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

// 主要な型をリエクスポート
pub use collector::SvgCollector;
pub use config::ScraperConfig;
pub use downloader::{Downloader, HttpFetcher};
pub use error::ScraperError;
pub use extract::{ExtractionStrategy, LinkDiscovery};
pub use navigator::Navigator;
pub use service::{CollectRequest, ScraperService};
pub use session::{BrowserSession, ChromiumPage};
pub use traits::{LinkExtractor, PageDriver};
pub use types::{
    CandidateLink, CandidateSet, CollectionReport, DownloadOutcome, DownloadResult, PageReport,
};
