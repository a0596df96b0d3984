use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScraperError;
use crate::retry::RetryPolicy;
use crate::settings::{DetailLevel, Scenario, Settings};
use crate::window::DateWindow;

/// 各ステップのタイムアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// ページ読み込み・要素待ち
    pub page: Duration,
    /// シナリオ全体
    pub run: Duration,
    /// 操作後の追加待機
    pub extra_delay: Duration,
    /// ファイル1件のダウンロード
    pub download: Duration,
    /// 注文1件の処理
    pub processing: Duration,
    /// CDPリクエスト
    pub request: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            page: Duration::from_millis(10_000),
            run: Duration::from_millis(600_000),
            extra_delay: Duration::from_millis(1_000),
            download: Duration::from_millis(15_000),
            processing: Duration::from_millis(30_000),
            request: Duration::from_millis(30_000),
        }
    }
}

/// 1シナリオ実行分の解決済み設定
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub scenario_id: String,
    pub url: String,
    pub login: String,
    pub password: String,
    pub download_path: PathBuf,
    pub screenshot_dir: PathBuf,
    pub headless: bool,
    pub window: (u32, u32),
    pub date_window: DateWindow,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub detail: DetailLevel,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            scenario_id: String::new(),
            url: String::new(),
            login: String::new(),
            password: String::new(),
            download_path: PathBuf::from("./faktury"),
            screenshot_dir: PathBuf::from("logs/screenshots"),
            headless: true,
            window: (1920, 1080),
            date_window: DateWindow::Rolling { weeks: 2 },
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            detail: DetailLevel::Minimal,
        }
    }
}

impl ScraperConfig {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// 設定ファイルのグローバル値とシナリオ値を合成
    pub fn from_scenario(settings: &Settings, scenario: &Scenario) -> Result<Self, ScraperError> {
        if scenario.url.trim().is_empty() {
            return Err(ScraperError::Config(format!(
                "シナリオ '{}' の url が空です",
                scenario.id
            )));
        }

        let pw = &settings.playwright;
        let ms = Duration::from_millis;

        Ok(Self {
            scenario_id: scenario.id.clone(),
            url: scenario.url.clone(),
            login: scenario.settings.login.clone(),
            password: scenario.settings.password.clone(),
            download_path: scenario.settings.download_path.clone(),
            screenshot_dir: pw
                .screenshot_path
                .clone()
                .unwrap_or_else(|| settings.general.screenshot_path.clone()),
            headless: scenario.settings.headless.unwrap_or(pw.headless),
            window: (settings.app.width, settings.app.height),
            date_window: DateWindow::from_settings(&scenario.settings)?,
            timeouts: Timeouts {
                page: ms(pw.page_timeout),
                run: ms(pw.test_timeout),
                extra_delay: ms(pw.extra_delay),
                download: ms(pw.download_timeout),
                processing: ms(pw.processing_timeout),
                request: ms(settings.general.default_timeout),
            },
            retry: RetryPolicy::new(pw.max_network_retries, ms(pw.network_retry_delay)),
            detail: pw.log_level,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_path = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// シナリオ全体のタイムアウト
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.run = timeout;
        self
    }

    pub fn with_date_window(mut self, window: DateWindow) -> Self {
        self.date_window = window;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
