//! ユニットテスト用のスクリプト化されたページ

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::traits::PageDriver;

#[derive(Default)]
struct State {
    /// 現在のスクロール高さの位置
    scroll_index: usize,
    /// クリックで開いたモーダルの href
    revealed: Option<String>,
    clicks: Vec<(String, usize)>,
    closes: usize,
    current_url: Option<String>,
}

pub struct FakePage {
    html: String,
    failing_gotos: usize,
    goto_calls: AtomicUsize,
    scroll_heights: Vec<u64>,
    elements: HashMap<String, usize>,
    reveals: HashMap<String, Vec<Option<String>>>,
    state: Mutex<State>,
    /// クリックで詳細ページへ遷移する
    navigating_clicks: bool,
}

impl FakePage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            failing_gotos: 0,
            goto_calls: AtomicUsize::new(0),
            scroll_heights: vec![1000],
            elements: HashMap::new(),
            reveals: HashMap::new(),
            state: Mutex::new(State::default()),
            navigating_clicks: false,
        }
    }

    pub fn unreachable() -> Self {
        Self::new("").failing_gotos(usize::MAX)
    }

    pub fn failing_gotos(mut self, n: usize) -> Self {
        self.failing_gotos = n;
        self
    }

    pub fn with_scroll_heights(mut self, heights: Vec<u64>) -> Self {
        self.scroll_heights = heights;
        self
    }

    pub fn with_elements(mut self, selector: &str, count: usize) -> Self {
        self.elements.insert(selector.to_string(), count);
        self
    }

    /// item_selector の i 番目をクリックすると hrefs[i] を持つダウンロードリンクが現れる
    pub fn with_reveals(mut self, item_selector: &str, hrefs: Vec<Option<&str>>) -> Self {
        self.elements.insert(item_selector.to_string(), hrefs.len());
        self.reveals.insert(
            item_selector.to_string(),
            hrefs.into_iter().map(|h| h.map(str::to_string)).collect(),
        );
        self
    }

    pub fn navigating_clicks(mut self) -> Self {
        self.navigating_clicks = true;
        self
    }

    pub fn goto_calls(&self) -> usize {
        self.goto_calls.load(Ordering::SeqCst)
    }

    pub fn clicks(&self) -> Vec<(String, usize)> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        let call = self.goto_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failing_gotos {
            return Err(ScraperError::Navigation {
                url: url.to_string(),
                attempts: 1,
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.current_url = Some(url.to_string());
        state.revealed = None;
        Ok(())
    }

    async fn content(&self) -> Result<String, ScraperError> {
        Ok(self.html.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScraperError> {
        let mut state = self.state.lock().unwrap();
        if script.contains("scrollTo") {
            state.scroll_index = (state.scroll_index + 1).min(self.scroll_heights.len() - 1);
            return Ok(serde_json::Value::Null);
        }
        if script.contains("scrollHeight") {
            return Ok(serde_json::json!(self.scroll_heights[state.scroll_index]));
        }
        if script.contains("outerHTML.length") {
            return Ok(serde_json::json!(self.html.len()));
        }
        Ok(serde_json::Value::Null)
    }

    async fn count(&self, selector: &str) -> Result<usize, ScraperError> {
        Ok(self.elements.get(selector).copied().unwrap_or(0))
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<(), ScraperError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push((selector.to_string(), index));
        let revealed = self
            .reveals
            .get(selector)
            .and_then(|hrefs| hrefs.get(index))
            .cloned()
            .flatten();
        match revealed {
            Some(href) => {
                if self.navigating_clicks {
                    if let Some(current) = state.current_url.clone() {
                        state.current_url = Some(format!("{}detail/{}", current, index));
                    }
                }
                state.revealed = Some(href);
                Ok(())
            }
            None => Err(ScraperError::Timeout(format!("click {} [{}]", selector, index))),
        }
    }

    async fn first_attribute(
        &self,
        _selector: &str,
        attribute: &str,
    ) -> Result<Option<String>, ScraperError> {
        if attribute != "href" {
            return Ok(None);
        }
        Ok(self.state.lock().unwrap().revealed.clone())
    }

    async fn click_first_visible(&self, _selector: &str) -> Result<bool, ScraperError> {
        let mut state = self.state.lock().unwrap();
        if state.revealed.take().is_some() {
            state.closes += 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn current_url(&self) -> Result<Option<String>, ScraperError> {
        Ok(self.state.lock().unwrap().current_url.clone())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        _timeout: Duration,
    ) -> Result<bool, ScraperError> {
        Ok(self.elements.get(selector).copied().unwrap_or(0) > 0 || self.html.contains(".svg"))
    }
}
