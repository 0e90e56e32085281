//! SVGファイルのダウンロード
//!
//! 1リンクの失敗はバッチ全体を止めない。リトライを使い切ったリンクは
//! 失敗として記録し、次の候補へ進む。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use reqwest::Client;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::types::{CandidateLink, DownloadOutcome, DownloadResult};

/// ファイル名の最大長
const MAX_FILENAME_LEN: usize = 150;
const SVG_ACCEPT: &str = "image/svg+xml,image/*;q=0.8,*/*;q=0.5";

/// reqwest によるアセット取得
///
/// ブラウザと同じUA・言語を送り、ブラウザのクッキーを引き継げる。
/// クッキーは取得元ページのホストにだけ送る。
pub struct HttpFetcher {
    client: Client,
    referer: Option<String>,
    cookies: Arc<Jar>,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScraperError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(SVG_ACCEPT));
        if let Ok(lang) = HeaderValue::from_str(&config.locale) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }

        let cookies = Arc::new(Jar::default());
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .cookie_provider(Arc::clone(&cookies))
            .default_headers(headers)
            .timeout(config.default_timeout)
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ScraperError::Config(format!("HTTPクライアント作成エラー: {}", e)))?;

        Ok(Self {
            client,
            referer: None,
            cookies,
        })
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// ブラウザセッションのクッキーを `origin` のホスト限定で登録する
    pub fn with_cookies(self, cookies: &[(String, String)], origin: &Url) -> Self {
        for (name, value) in cookies {
            self.cookies
                .add_cookie_str(&format!("{}={}; Path=/", name, value), origin);
        }
        if !cookies.is_empty() {
            debug!("Registered {} cookies for {}", cookies.len(), origin);
        }
        self
    }

    /// GETしてボディを返す。2xx 以外は `ScraperError::Http`。
    pub async fn fetch(&self, url: &str) -> Result<(Option<String>, Vec<u8>), ScraperError> {
        let mut request = self.client.get(url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok((content_type, body.to_vec()))
    }
}

/// SVGらしいボディか判定する
///
/// 空でなく、BOM・空白を除いた先頭が `<?xml` / `<svg` / `<!DOCTYPE svg` /
/// コメントのいずれかで、本文中に `<svg` を含むこと。
pub fn looks_like_svg(body: &[u8]) -> bool {
    let trimmed = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let start = trimmed
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(trimmed.len());
    let head = &trimmed[start..];
    if head.is_empty() {
        return false;
    }

    let starts_with = |prefix: &[u8]| {
        head.len() >= prefix.len() && head[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    let valid_prologue = starts_with(b"<?xml")
        || starts_with(b"<svg")
        || starts_with(b"<!doctype svg")
        || starts_with(b"<!--");

    valid_prologue && head.windows(4).any(|w| w.eq_ignore_ascii_case(b"<svg"))
}

fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim_matches('_');
    cleaned.chars().take(MAX_FILENAME_LEN).collect()
}

fn has_svg_extension(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".svg")
}

/// 保存するファイル名を決める
///
/// `download` 属性のヒント → URLの空でない最後のパスセグメント（拡張子が
/// 無くクエリがあればクエリも付加）→ `svg_{index:04}.svg` の順。
pub fn filename_for(link: &CandidateLink, index: usize) -> String {
    let from_hint = link
        .filename_hint
        .as_deref()
        .map(sanitize_filename)
        .filter(|name| !name.is_empty());

    let from_url = || {
        let url = Url::parse(&link.url).ok()?;
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())?;

        if has_svg_extension(&segment) {
            return Some(segment);
        }
        match url.query().map(sanitize_filename).filter(|q| !q.is_empty()) {
            Some(query) => Some(format!("{}_{}", segment, query)),
            None => Some(segment),
        }
    };

    let name = from_hint
        .or_else(from_url)
        .unwrap_or_else(|| format!("svg_{:04}", index));

    if has_svg_extension(&name) {
        name
    } else {
        format!("{}.svg", name)
    }
}

pub struct Downloader {
    fetcher: HttpFetcher,
    dest_dir: PathBuf,
    max_retries: u32,
    retry_delay: Duration,
    download_delay: Duration,
    index_base: usize,
}

impl Downloader {
    pub fn new(config: &ScraperConfig, fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            dest_dir: config.download_dir.clone(),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay,
            download_delay: config.download_delay,
            index_base: 0,
        }
    }

    /// 合成ファイル名の連番を `index_base + 1` から始める
    pub fn with_index_base(mut self, index_base: usize) -> Self {
        self.index_base = index_base;
        self
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// 候補を順にダウンロードする
    ///
    /// `limit` は成功数の上限。上限に達したら残りのリンクには触れない。
    pub async fn download_all(
        &self,
        links: &[CandidateLink],
        limit: Option<usize>,
    ) -> Vec<DownloadResult> {
        let mut results = Vec::new();
        let mut succeeded = 0;

        for (i, link) in links.iter().enumerate() {
            if limit.is_some_and(|max| succeeded >= max) {
                info!("Reached maximum download limit of {}", limit.unwrap_or(0));
                break;
            }
            if i > 0 && !self.download_delay.is_zero() {
                sleep(self.download_delay).await;
            }

            info!("Downloading {}/{}: {}", i + 1, links.len(), link.url);
            let result = self.download(link, self.index_base + i + 1).await;
            if result.is_success() {
                succeeded += 1;
            }
            results.push(result);
        }

        results
    }

    /// 1リンクをダウンロードする。失敗してもエラーは返さず結果に記録する。
    pub async fn download(&self, link: &CandidateLink, index: usize) -> DownloadResult {
        let filename = filename_for(link, index);
        let path = self.dest_dir.join(&filename);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            info!("File already exists, skipping: {}", filename);
            return DownloadResult {
                url: link.url.clone(),
                outcome: DownloadOutcome::AlreadyExists,
                path: Some(path),
                bytes_written: 0,
                attempts: 0,
                error: None,
            };
        }

        let mut last_error: Option<ScraperError> = None;
        let mut attempts = 0;

        for attempt in 1..=self.max_retries {
            attempts = attempt;
            match self.try_download(&link.url, &path).await {
                Ok(bytes) => {
                    info!("Downloaded: {} ({} bytes)", filename, bytes);
                    return DownloadResult {
                        url: link.url.clone(),
                        outcome: DownloadOutcome::Downloaded,
                        path: Some(path),
                        bytes_written: bytes,
                        attempts,
                        error: None,
                    };
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(
                        "Download attempt {}/{} failed for {}: {}",
                        attempt, self.max_retries, link.url, e
                    );
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                    if attempt < self.max_retries {
                        sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!("Giving up on {}: {}", link.url, message);
        DownloadResult {
            url: link.url.clone(),
            outcome: DownloadOutcome::Failed,
            path: None,
            bytes_written: 0,
            attempts,
            error: Some(message),
        }
    }

    async fn try_download(&self, url: &str, path: &Path) -> Result<u64, ScraperError> {
        let (content_type, body) = self.fetcher.fetch(url).await?;

        if !looks_like_svg(&body) {
            return Err(ScraperError::InvalidContent(format!(
                "{} (content-type: {}, {} bytes)",
                url,
                content_type.as_deref().unwrap_or("unknown"),
                body.len()
            )));
        }

        // 途中で失敗しても中途半端なファイルを残さない
        write_atomically(path, &body).await?;
        debug!("Wrote {}", path.display());

        Ok(body.len() as u64)
    }
}

/// `.part` に書いてからリネームする。失敗時は `.part` を消す。
async fn write_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let result = async {
        tokio::fs::write(&part, body).await?;
        tokio::fs::rename(&part, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    result
}
