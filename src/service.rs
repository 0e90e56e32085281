use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::collector::SvgCollector;
use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::extract::ExtractionStrategy;
use crate::types::CollectionReport;

/// コレクションダウンロードリクエスト
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub collection_url: String,
    pub download_dir: Option<PathBuf>,
    pub max_downloads: Option<usize>,
    pub headless: Option<bool>,
    pub strategy: Option<ExtractionStrategy>,
}

impl CollectRequest {
    pub fn new(collection_url: impl Into<String>) -> Self {
        Self {
            collection_url: collection_url.into(),
            download_dir: None,
            max_downloads: None,
            headless: None,
            strategy: None,
        }
    }

    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(path.into());
        self
    }

    pub fn with_max_downloads(mut self, max_downloads: usize) -> Self {
        self.max_downloads = Some(max_downloads);
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// ベース設定にリクエスト固有の値を重ねる
    pub fn apply_to(&self, base: &ScraperConfig) -> ScraperConfig {
        let mut config = base.clone();
        if let Some(dir) = &self.download_dir {
            config.download_dir = dir.clone();
        }
        if self.max_downloads.is_some() {
            config = config.with_max_downloads(self.max_downloads);
        }
        if let Some(headless) = self.headless {
            config.headless = headless;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        config
    }
}

/// tower::Serviceを実装したSVGコレクションサービス
#[derive(Debug, Clone, Default)]
pub struct ScraperService {
    base_config: ScraperConfig,
}

impl ScraperService {
    pub fn new(base_config: ScraperConfig) -> Self {
        Self { base_config }
    }
}

impl Service<CollectRequest> for ScraperService {
    type Response = CollectionReport;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CollectRequest) -> Self::Future {
        info!("Collect request received: url={}", req.collection_url);
        let config = req.apply_to(&self.base_config);

        Box::pin(async move {
            config.validate()?;
            let collector = SvgCollector::new(config);
            let report = collector.run(&req.collection_url).await?;

            info!(
                "Collect request finished: url={}, downloaded={}/{}",
                report.collection_url,
                report.succeeded(),
                report.candidates_found()
            );
            Ok(report)
        })
    }
}
