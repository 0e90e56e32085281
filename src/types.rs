//! 抽出・ダウンロード結果の型定義

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ダウンロード候補リンク
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLink {
    pub url: String,
    /// `download` 属性などから推測したファイル名
    pub filename_hint: Option<String>,
}

impl CandidateLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename_hint: None,
        }
    }

    pub fn with_filename_hint(mut self, hint: Option<String>) -> Self {
        self.filename_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }
}

/// URLで重複排除された候補リンク集合
///
/// 反復順は最初に見つかった順。
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    links: Vec<CandidateLink>,
    seen: HashSet<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新規URLなら追加して true
    pub fn insert(&mut self, link: CandidateLink) -> bool {
        if self.seen.contains(&link.url) {
            // 既存エントリにヒントが無ければ補完する
            if let Some(hint) = link.filename_hint {
                if let Some(existing) = self.links.iter_mut().find(|l| l.url == link.url) {
                    existing.filename_hint.get_or_insert(hint);
                }
            }
            return false;
        }
        self.seen.insert(link.url.clone());
        self.links.push(link);
        true
    }

    /// 和集合（冪等）
    pub fn merge(&mut self, other: CandidateSet) {
        for link in other.links {
            self.insert(link);
        }
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&CandidateLink) -> bool,
    {
        let seen = &mut self.seen;
        self.links.retain(|link| {
            let kept = keep(link);
            if !kept {
                seen.remove(&link.url);
            }
            kept
        });
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandidateLink> {
        self.links.iter()
    }

    pub fn into_vec(self) -> Vec<CandidateLink> {
        self.links
    }
}

impl FromIterator<CandidateLink> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = CandidateLink>>(iter: I) -> Self {
        let mut set = CandidateSet::new();
        for link in iter {
            set.insert(link);
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    Downloaded,
    /// 同名ファイルが既に存在したため書き込まなかった
    AlreadyExists,
    Failed,
}

/// 1リンク分のダウンロード結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub url: String,
    pub outcome: DownloadOutcome,
    pub path: Option<PathBuf>,
    pub bytes_written: u64,
    pub attempts: u32,
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            DownloadOutcome::Downloaded | DownloadOutcome::AlreadyExists
        )
    }
}

/// 1ページ分の処理結果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageReport {
    pub url: String,
    pub candidates: usize,
    pub results: Vec<DownloadResult>,
}

impl PageReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == DownloadOutcome::Failed)
            .count()
    }
}

/// コレクション全体の実行結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    pub collection_url: String,
    pub pages: Vec<PageReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CollectionReport {
    pub fn new(collection_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            collection_url: collection_url.into(),
            pages: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn candidates_found(&self) -> usize {
        self.pages.iter().map(|p| p.candidates).sum()
    }

    pub fn attempted(&self) -> usize {
        self.pages.iter().map(|p| p.results.len()).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.pages.iter().map(PageReport::succeeded).sum()
    }

    pub fn downloaded(&self) -> usize {
        self.results()
            .filter(|r| r.outcome == DownloadOutcome::Downloaded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.pages.iter().map(PageReport::failed).sum()
    }

    pub fn no_links_found(&self) -> bool {
        self.candidates_found() == 0
    }

    pub fn results(&self) -> impl Iterator<Item = &DownloadResult> {
        self.pages.iter().flat_map(|p| p.results.iter())
    }
}
