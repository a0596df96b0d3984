//! 任意ページの簡易チェック
//!
//! URLを開いてタイトル・要素数・読み込み時間を記録し、全画面スクリーンショットを残す。

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use chromiumoxide::Page;
use serde::Deserialize;
use tracing::{info, warn};

use crate::browser::{self, BrowserSession, LaunchOptions};
use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::Scraper;

/// ページ情報を1回の評価でまとめて取得するスクリプト
const PAGE_FACTS_SCRIPT: &str = r#"
(function() {
    var nav = performance.getEntriesByType('navigation')[0];
    return {
        title: document.title || '',
        links: document.querySelectorAll('a').length,
        images: document.querySelectorAll('img').length,
        forms: document.querySelectorAll('form').length,
        buttons: document.querySelectorAll('button').length,
        width: window.innerWidth,
        height: window.innerHeight,
        dom_content_loaded_ms: nav ? nav.domContentLoadedEventEnd : null,
        load_ms: nav ? nav.loadEventEnd : null
    };
})()
"#;

/// ブラウザから受け取る生データ
#[derive(Debug, Deserialize)]
struct PageFacts {
    title: String,
    links: u32,
    images: u32,
    forms: u32,
    buttons: u32,
    width: u32,
    height: u32,
    dom_content_loaded_ms: Option<f64>,
    load_ms: Option<f64>,
}

/// ページチェック結果
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub url: String,
    pub title: String,
    pub links: u32,
    pub images: u32,
    pub forms: u32,
    pub buttons: u32,
    pub viewport: (u32, u32),
    pub dom_content_loaded_ms: Option<f64>,
    pub load_ms: Option<f64>,
    pub screenshot: Option<PathBuf>,
}

impl ProbeReport {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("URL: {}", self.url),
            format!("Title: {}", self.title),
            format!(
                "Links: {}, images: {}, forms: {}, buttons: {}",
                self.links, self.images, self.forms, self.buttons
            ),
            format!("Viewport: {}x{}", self.viewport.0, self.viewport.1),
        ];
        if let Some(ms) = self.load_ms {
            lines.push(format!("Load: {:.0} ms", ms));
        }
        if let Some(path) = &self.screenshot {
            lines.push(format!("Screenshot: {}", path.display()));
        }
        lines.join("\n")
    }
}

/// URLをファイル名に使える形に変換
pub fn url_slug(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    let slug: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(50)
        .collect();

    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

pub struct PageProbe {
    config: ScraperConfig,
    session: Option<BrowserSession>,
}

impl PageProbe {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn get_page(&self) -> Result<Page, ScraperError> {
        self.session
            .as_ref()
            .map(|s| s.page().clone())
            .ok_or_else(|| ScraperError::BrowserInit("ブラウザが初期化されていません".into()))
    }

    fn screenshot_path(&self, prefix: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        self.config.screenshot_dir.join(format!(
            "{}_{}_{}.png",
            prefix,
            url_slug(&self.config.url),
            timestamp
        ))
    }

    async fn inspect(&self, page: &Page) -> Result<ProbeReport, ScraperError> {
        let url = self.config.url.as_str();
        self.config
            .retry
            .run("open page", move |_| browser::goto(page, url))
            .await?;
        browser::wait_request_idle(page, self.config.timeouts.page).await;

        let facts: PageFacts = browser::eval(page, PAGE_FACTS_SCRIPT).await?;
        info!(
            "[{}] Title: '{}', {} links, {} images",
            self.config.scenario_id, facts.title, facts.links, facts.images
        );

        let screenshot = browser::save_screenshot(page, &self.screenshot_path("screenshot"), true).await?;
        info!("[{}] Screenshot saved: {}", self.config.scenario_id, screenshot.display());

        Ok(ProbeReport {
            url: self.config.url.clone(),
            title: facts.title,
            links: facts.links,
            images: facts.images,
            forms: facts.forms,
            buttons: facts.buttons,
            viewport: (facts.width, facts.height),
            dom_content_loaded_ms: facts.dom_content_loaded_ms,
            load_ms: facts.load_ms,
            screenshot: Some(screenshot),
        })
    }
}

#[async_trait]
impl Scraper for PageProbe {
    type Output = ProbeReport;

    async fn initialize(&mut self) -> Result<(), ScraperError> {
        info!("[{}] Initializing browser...", self.config.scenario_id);
        let session = BrowserSession::launch(LaunchOptions {
            headless: self.config.headless,
            window: self.config.window,
            download_dir: None,
            request_timeout: self.config.timeouts.request,
        })
        .await?;
        self.session = Some(session);
        Ok(())
    }

    /// ログイン不要
    async fn login(&mut self) -> Result<(), ScraperError> {
        Ok(())
    }

    async fn download(&mut self) -> Result<ProbeReport, ScraperError> {
        let page = self.get_page()?;

        match self.inspect(&page).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let path = self.screenshot_path("error");
                match browser::save_screenshot(&page, &path, true).await {
                    Ok(path) => warn!("Error screenshot saved: {}", path.display()),
                    Err(shot_err) => warn!("Error screenshot failed: {}", shot_err),
                }
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        if let Some(session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_slug() {
        assert_eq!(url_slug("https://www.google.com"), "www_google_com");
        assert_eq!(url_slug("http://example.org/a?b=c/"), "example_org_a_b_c");
        assert_eq!(url_slug("https://"), "page");
        assert_eq!(url_slug(&format!("https://{}", "x".repeat(80))).len(), 50);
    }

    #[test]
    fn test_screenshot_path_uses_configured_dir() {
        let config = ScraperConfig::default().with_url("https://www.google.com");
        let probe = PageProbe::new(config);
        let path = probe.screenshot_path("screenshot");

        assert!(path.starts_with("logs/screenshots"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("screenshot_www_google_com_"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_probe_summary() {
        let report = ProbeReport {
            url: "https://www.google.com".into(),
            title: "Google".into(),
            links: 12,
            viewport: (1920, 1080),
            load_ms: Some(812.4),
            ..Default::default()
        };
        let summary = report.summary();
        assert!(summary.contains("Title: Google"));
        assert!(summary.contains("Links: 12"));
        assert!(summary.contains("1920x1080"));
        assert!(summary.contains("Load: 812 ms"));
    }

    #[tokio::test]
    #[ignore] // Chromium が必要
    async fn test_probe_live() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ScraperConfig::default().with_url("https://www.google.com");
        config.screenshot_dir = dir.path().to_path_buf();

        let mut probe = PageProbe::new(config);
        let report = probe.execute().await.expect("probe failed");
        assert!(report.screenshot.unwrap().exists());
    }
}
