//! 設定ファイル (`config/settings.json`) の型定義

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// `app` セクション (ブラウザウィンドウのサイズ)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "Fakturator e-urtica".to_string(),
            width: 1920,
            height: 1080,
        }
    }
}

/// ログファイルのローテーション単位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// `general` セクション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// tracing のフィルタ指定 (例: "info", "fakturator=debug")
    pub log_level: String,
    pub log_dir: PathBuf,
    pub log_rotation: LogRotation,
    /// 保持するローテーション済みログファイル数
    pub log_retention: usize,
    pub screenshot_path: PathBuf,
    /// ミリ秒
    pub default_timeout: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            log_rotation: LogRotation::Daily,
            log_retention: 30,
            screenshot_path: PathBuf::from("logs/screenshots"),
            default_timeout: 30_000,
        }
    }
}

/// シナリオ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    /// e-urtica から請求書をダウンロード
    Invoices,
    /// 任意のページを開いて情報とスクリーンショットを取得
    Probe,
}

impl ScenarioKind {
    /// URLから種別を推定
    pub fn infer(url: &str) -> Self {
        if url.contains("e-urtica.pl") {
            ScenarioKind::Invoices
        } else {
            ScenarioKind::Probe
        }
    }
}

/// シナリオ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub active: bool,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ScenarioKind>,
    #[serde(default)]
    pub settings: ScenarioSettings,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            active: true,
            url: url.into(),
            kind: None,
            settings: ScenarioSettings::default(),
        }
    }

    /// 明示された種別、なければURLから推定した種別
    pub fn kind(&self) -> ScenarioKind {
        self.kind.unwrap_or_else(|| ScenarioKind::infer(&self.url))
    }
}

/// シナリオごとの設定
///
/// `email_*` のうち指定されたものはグローバルの `email` セクションを上書きする。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSettings {
    pub login: String,
    pub password: String,
    /// YYYY-MM-DD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    /// YYYY-MM-DD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    pub weeks_to_process: u32,
    pub download_path: PathBuf,
    /// 古い請求書フォルダを残す週数
    pub keep_weeks: u32,
    pub send_emails: bool,
    pub email_recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_smtp_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_smtp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_use_tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            login: String::new(),
            password: String::new(),
            date_from: None,
            date_to: None,
            weeks_to_process: 2,
            download_path: PathBuf::from("./faktury"),
            keep_weeks: 12,
            send_emails: false,
            email_recipient: String::new(),
            email_smtp_server: None,
            email_smtp_port: None,
            email_sender: None,
            email_password: None,
            email_use_tls: None,
            headless: None,
        }
    }
}

/// ログの詳細度 (請求書処理の行単位ログを info に出すかどうか)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Minimal,
    Normal,
    Verbose,
}

impl DetailLevel {
    /// `level` のメッセージを表示するか
    pub fn allows(self, level: DetailLevel) -> bool {
        level <= self
    }
}

/// `playwright` セクション: ブラウザ自動化のタイムアウトとリトライ (時間はミリ秒)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightRuntimeConfig {
    pub headless: bool,
    pub page_timeout: u64,
    pub test_timeout: u64,
    pub extra_delay: u64,
    pub download_timeout: u64,
    pub processing_timeout: u64,
    pub log_level: DetailLevel,
    pub max_network_retries: u32,
    pub network_retry_delay: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<PathBuf>,
}

impl Default for PlaywrightRuntimeConfig {
    fn default() -> Self {
        Self {
            headless: true,
            page_timeout: 10_000,
            test_timeout: 600_000,
            extra_delay: 1_000,
            download_timeout: 15_000,
            processing_timeout: 30_000,
            log_level: DetailLevel::Minimal,
            max_network_retries: 3,
            network_retry_delay: 5_000,
            screenshot_path: None,
        }
    }
}

/// `email` セクション: SMTP のデフォルト設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub password: String,
    pub use_tls: bool,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: 587,
            sender: String::new(),
            password: String::new(),
            use_tls: true,
            timeout_secs: 30,
        }
    }
}

impl EmailConfig {
    /// シナリオ側の `email_*` 指定で上書きした設定を返す
    pub fn overridden_by(&self, scenario: &ScenarioSettings) -> EmailConfig {
        EmailConfig {
            smtp_server: scenario
                .email_smtp_server
                .clone()
                .unwrap_or_else(|| self.smtp_server.clone()),
            smtp_port: scenario.email_smtp_port.unwrap_or(self.smtp_port),
            sender: scenario
                .email_sender
                .clone()
                .unwrap_or_else(|| self.sender.clone()),
            password: scenario
                .email_password
                .clone()
                .unwrap_or_else(|| self.password.clone()),
            use_tls: scenario.email_use_tls.unwrap_or(self.use_tls),
            timeout_secs: self.timeout_secs,
        }
    }
}
