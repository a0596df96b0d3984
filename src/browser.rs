//! ブラウザ起動とページ操作の共通処理

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ScraperError;

/// ネットワークアイドル判定のインターバル（ミリ秒）
const NETWORK_IDLE_CHECK_INTERVAL_MS: u64 = 500;
/// セレクタ出現待ちのインターバル（ミリ秒）
const SELECTOR_POLL_INTERVAL_MS: u64 = 250;
/// ダウンロード完了確認のインターバル（ミリ秒）
const DOWNLOAD_POLL_INTERVAL_MS: u64 = 500;

/// 起動オプション
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window: (u32, u32),
    /// ダウンロードの保存先 (なければダウンロードを許可しない)
    pub download_dir: Option<PathBuf>,
    pub request_timeout: Duration,
}

/// 起動ごとのユーザーデータディレクトリ (temp 直下)
pub fn profile_dir() -> PathBuf {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let unique_id = format!(
        "{}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    );
    std::env::temp_dir().join(format!("fakturator-{}", unique_id))
}

/// プロフィールディレクトリを削除 (失敗はログのみ)
pub fn discard_profile(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        debug!("Profile cleanup failed ({}): {}", dir.display(), e);
    }
}

/// ダウンロードの保存先を切り替える
pub async fn set_download_dir(page: &Page, dir: &Path) -> Result<(), ScraperError> {
    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(dir.to_string_lossy().to_string())
        .build()
        .map_err(|e| ScraperError::Download(format!("ダウンロード設定エラー: {}", e)))?;

    page.execute(params)
        .await
        .map_err(|e| ScraperError::Download(format!("ダウンロード設定エラー: {}", e)))?;
    Ok(())
}

/// クリックごとに空のダウンロード先を払い出す
///
/// 前のクリックのダウンロードが遅れて完了しても、別のスロットには現れない。
#[derive(Debug)]
pub struct DownloadSlots {
    root: PathBuf,
    next: AtomicU32,
}

impl DownloadSlots {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next: AtomicU32::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 新しい空ディレクトリを作って返す (正規化済みパス)
    pub fn next_slot(&self) -> Result<PathBuf, ScraperError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let dir = self.root.join(format!("{:04}", n));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir.canonicalize().unwrap_or(dir))
    }

    /// 残ったファイルごと削除
    pub fn clear(&self) {
        if !self.root.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!("Staging cleared: {}", self.root.display()),
            Err(e) => debug!("Staging cleanup failed ({}): {}", self.root.display(), e),
        }
    }
}

/// 起動済みブラウザとメインページ
pub struct BrowserSession {
    browser: Browser,
    page: Page,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(options: LaunchOptions) -> Result<Self, ScraperError> {
        info!(
            "Launching browser (headless={}, window={}x{})",
            options.headless, options.window.0, options.window.1
        );

        let download_dir = match &options.download_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Some(dir.canonicalize().unwrap_or_else(|_| dir.clone()))
            }
            None => None,
        };

        let user_data_dir = profile_dir();

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .window_size(options.window.0, options.window.1)
            .request_timeout(options.request_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");

        // Chrome パスを環境変数で上書き可能
        if let Ok(path) = std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH")) {
            builder = builder.chrome_executable(path);
        }

        if !options.headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (mut browser, mut handler) = match Browser::launch(config).await {
            Ok(launched) => launched,
            Err(e) => {
                discard_profile(&user_data_dir);
                return Err(ScraperError::BrowserInit(e.to_string()));
            }
        };

        // ブラウザイベントハンドラをバックグラウンドで実行
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let prepared = async {
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
            if let Some(dir) = &download_dir {
                set_download_dir(&page, dir).await?;
            }
            Ok::<_, ScraperError>(page)
        }
        .await;

        let page = match prepared {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                discard_profile(&user_data_dir);
                return Err(e);
            }
        };

        info!("Browser ready");
        Ok(Self {
            browser,
            page,
            user_data_dir,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// ブラウザを終了し、プロフィールディレクトリを削除
    pub async fn close(mut self) -> Result<(), ScraperError> {
        info!("Closing browser...");
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait failed: {}", e);
        }
        discard_profile(&self.user_data_dir);
        Ok(())
    }
}

/// JavaScript を評価して値を取り出す
pub async fn eval<T: DeserializeOwned>(page: &Page, script: &str) -> Result<T, ScraperError> {
    page.evaluate(script)
        .await
        .map_err(|e| ScraperError::JavaScript(e.to_string()))?
        .into_value::<T>()
        .map_err(|e| ScraperError::JavaScript(e.to_string()))
}

pub async fn goto(page: &Page, url: &str) -> Result<(), ScraperError> {
    page.goto(url)
        .await
        .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?;
    Ok(())
}

pub async fn reload(page: &Page) -> Result<(), ScraperError> {
    page.reload()
        .await
        .map_err(|e| ScraperError::Navigation(format!("reload: {}", e)))?;
    Ok(())
}

/// JSの文字列リテラルとして埋め込む
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// セレクタに一致する要素が現れるまで待機
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<(), ScraperError> {
    let script = format!("document.querySelector({}) !== null", js_string(selector));
    let start = Instant::now();

    loop {
        match eval::<bool>(page, &script).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => debug!("Selector check error ({}): {}", selector, e),
        }

        if start.elapsed() > timeout {
            return Err(ScraperError::Timeout(format!(
                "{} が {:?} 以内に現れませんでした",
                selector, timeout
            )));
        }
        sleep(Duration::from_millis(SELECTOR_POLL_INTERVAL_MS)).await;
    }
}

/// `scope` (空ならページ全体) 内でテキストを含む `tag` 要素をクリック。見つかれば true
pub async fn click_by_text(
    page: &Page,
    scope: &str,
    tag: &str,
    text: &str,
) -> Result<bool, ScraperError> {
    let script = format!(
        r#"
        (function() {{
            var scope = {scope};
            var root = (scope && document.querySelector(scope)) || document;
            var items = root.querySelectorAll({tag});
            var needle = {text}.toLowerCase();
            for (var i = 0; i < items.length; i++) {{
                if ((items[i].textContent || '').trim().toLowerCase().indexOf(needle) >= 0) {{
                    items[i].click();
                    return true;
                }}
            }}
            return false;
        }})()
        "#,
        scope = js_string(scope),
        tag = js_string(tag),
        text = js_string(text),
    );
    eval(page, &script).await
}

/// ネットワークリクエストがアイドル状態になるまで待機
///
/// タイムアウトしても失敗にはせず、そのまま進める。
pub async fn wait_request_idle(page: &Page, timeout: Duration) {
    const REQUIRED_IDLE_CHECKS: u32 = 3;
    let start = Instant::now();
    let mut idle_count = 0;

    while start.elapsed() < timeout {
        let idle = eval::<bool>(
            page,
            r#"
            (() => {
                const entries = performance.getEntriesByType('resource');
                const now = performance.now();
                const recent = entries.filter(e => (now - e.startTime) < 500 && e.duration === 0);
                return recent.length === 0 && document.readyState === 'complete';
            })()
            "#,
        )
        .await;

        match idle {
            Ok(true) => {
                idle_count += 1;
                if idle_count >= REQUIRED_IDLE_CHECKS {
                    debug!("Network idle after {:?}", start.elapsed());
                    return;
                }
            }
            Ok(false) => idle_count = 0,
            Err(e) => {
                debug!("Network idle check error: {}", e);
                idle_count = 0;
            }
        }

        sleep(Duration::from_millis(NETWORK_IDLE_CHECK_INTERVAL_MS)).await;
    }

    warn!(
        "Network idle timeout after {:?}, proceeding anyway",
        start.elapsed()
    );
}

/// PNGスクリーンショットを保存
pub async fn save_screenshot(
    page: &Page,
    path: &Path,
    full_page: bool,
) -> Result<PathBuf, ScraperError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    page.save_screenshot(ScreenshotParams::builder().full_page(full_page).build(), path)
        .await
        .map_err(|e| ScraperError::Download(format!("スクリーンショット保存失敗: {}", e)))?;
    debug!("Screenshot saved: {}", path.display());
    Ok(path.to_path_buf())
}

/// ディレクトリ内の完了済みファイル一覧
pub fn completed_files(dir: &Path) -> HashSet<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return HashSet::new();
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && !is_partial_download(path))
        .collect()
}

/// Chrome のダウンロード途中ファイルか
pub fn is_partial_download(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            ext == "crdownload" || ext == "tmp"
        })
        .unwrap_or(false)
}

/// `before` になかった完了済みファイルが現れるまで待機
pub async fn wait_for_new_file(
    dir: &Path,
    before: &HashSet<PathBuf>,
    timeout: Duration,
) -> Result<PathBuf, ScraperError> {
    let start = Instant::now();

    loop {
        if let Some(path) = completed_files(dir)
            .into_iter()
            .find(|path| !before.contains(path))
        {
            debug!("Download detected: {:?}", path);
            return Ok(path);
        }

        if start.elapsed() > timeout {
            return Err(ScraperError::Timeout(format!(
                "ダウンロードが{:?}以内に完了しませんでした",
                timeout
            )));
        }

        sleep(Duration::from_millis(DOWNLOAD_POLL_INTERVAL_MS)).await;
    }
}
