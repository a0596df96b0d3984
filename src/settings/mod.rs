//! 設定ファイルの読み込みとシナリオ管理
//!
//! 設定はプロセス開始時に1回読み込み、`&Settings` として各処理に渡す。

mod types;

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ScraperError;
use crate::window::DateWindow;

pub use types::{
    AppConfig, DetailLevel, EmailConfig, GeneralConfig, LogRotation, PlaywrightRuntimeConfig,
    Scenario, ScenarioKind, ScenarioSettings,
};

/// 設定ファイルの相対パス
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.json";

/// 設定ファイル全体
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub playwright: PlaywrightRuntimeConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

/// 検証で見つかった問題
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub scenario: Option<String>,
    pub message: String,
}

impl ConfigIssue {
    fn global(message: impl Into<String>) -> Self {
        Self {
            scenario: None,
            message: message.into(),
        }
    }

    fn scenario(id: &str, message: impl Into<String>) -> Self {
        Self {
            scenario: Some(id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scenario {
            Some(id) => write!(f, "[{}] {}", id, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Settings {
    /// 設定ファイルの場所を決める
    ///
    /// 実行ファイルと同じ場所の `config/settings.json` があればそれ、なければカレントディレクトリ基準。
    pub fn locate() -> PathBuf {
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_SETTINGS_PATH)));

        match beside_exe {
            Some(path) if path.exists() => path,
            _ => PathBuf::from(DEFAULT_SETTINGS_PATH),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ScraperError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScraperError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("{} を読み込めません: {}", path.display(), e))
        })?;
        let settings = Self::from_json(&json)?;
        info!(
            "Loaded settings from {} ({} scenarios)",
            path.display(),
            settings.scenarios.len()
        );
        Ok(settings)
    }

    /// 読み込み。ファイルがなければデフォルト設定を書き出してそれを返す
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ScraperError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(
            "Settings file {} not found, writing defaults",
            path.display()
        );
        let settings = Self::with_default_scenario();
        settings.save(path)?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ScraperError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// 初回起動用: e-urtica シナリオを1つ持つ設定
    pub fn with_default_scenario() -> Self {
        let mut urtica = Scenario::new(
            "urtica",
            "E-urtica faktury",
            "https://e-urtica.pl/authorization/login",
        );
        urtica.description = "Pobieranie faktur z e-urtica.pl".to_string();
        urtica.settings.headless = Some(false);

        Self {
            scenarios: vec![urtica],
            ..Default::default()
        }
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn active_scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| s.active)
    }

    pub fn add_scenario(&mut self, scenario: Scenario) -> Result<(), ScraperError> {
        if self.scenario(&scenario.id).is_some() {
            return Err(ScraperError::Config(format!(
                "シナリオID '{}' は既に存在します",
                scenario.id
            )));
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    pub fn update_scenario(&mut self, id: &str, scenario: Scenario) -> Result<(), ScraperError> {
        let slot = self
            .scenarios
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ScraperError::Config(format!("シナリオ '{}' が見つかりません", id)))?;
        *slot = scenario;
        Ok(())
    }

    pub fn remove_scenario(&mut self, id: &str) -> Option<Scenario> {
        let index = self.scenarios.iter().position(|s| s.id == id)?;
        Some(self.scenarios.remove(index))
    }

    /// シナリオのメール設定 (グローバル設定をシナリオ側で上書き)
    pub fn email_for(&self, scenario: &Scenario) -> EmailConfig {
        self.email.overridden_by(&scenario.settings)
    }

    /// 設定全体を検証し、見つかった問題をすべて返す
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.app.width == 0 || self.app.height == 0 {
            issues.push(ConfigIssue::global("app.width / app.height は 0 にできません"));
        }
        if self.playwright.page_timeout == 0 || self.playwright.download_timeout == 0 {
            issues.push(ConfigIssue::global(
                "playwright.page_timeout / download_timeout は 0 にできません",
            ));
        }

        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            if scenario.id.trim().is_empty() {
                issues.push(ConfigIssue::global("IDが空のシナリオがあります"));
                continue;
            }
            if !seen.insert(scenario.id.as_str()) {
                issues.push(ConfigIssue::scenario(&scenario.id, "シナリオIDが重複しています"));
            }
            issues.extend(self.validate_scenario(scenario));
        }

        issues
    }

    fn validate_scenario(&self, scenario: &Scenario) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let id = scenario.id.as_str();
        let settings = &scenario.settings;

        if scenario.url.trim().is_empty() {
            issues.push(ConfigIssue::scenario(id, "url が空です"));
        }

        if let Err(e) = DateWindow::from_settings(settings) {
            issues.push(ConfigIssue::scenario(id, e.to_string()));
        }

        if scenario.active && scenario.kind() == ScenarioKind::Invoices {
            if settings.login.trim().is_empty() || settings.password.is_empty() {
                issues.push(ConfigIssue::scenario(id, "login / password が未設定です"));
            }
            if settings.download_path.as_os_str().is_empty() {
                issues.push(ConfigIssue::scenario(id, "download_path が空です"));
            }
        }

        if settings.send_emails {
            if settings.email_recipient.trim().is_empty() {
                issues.push(ConfigIssue::scenario(
                    id,
                    "send_emails が有効ですが email_recipient が空です",
                ));
            }
            let email = self.email_for(scenario);
            if email.smtp_server.trim().is_empty() {
                issues.push(ConfigIssue::scenario(id, "SMTPサーバーが未設定です"));
            }
            if email.sender.trim().is_empty() {
                issues.push(ConfigIssue::scenario(id, "送信元アドレスが未設定です"));
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "app": {"name": "Test", "width": 800, "height": 600},
            "general": {"log_level": "debug"},
            "scenarios": [
                {
                    "id": "urtica",
                    "name": "E-urtica",
                    "active": true,
                    "url": "https://e-urtica.pl/authorization/login",
                    "settings": {
                        "login": "user@example.com",
                        "password": "secret",
                        "send_emails": true,
                        "email_recipient": "to@example.com",
                        "email_smtp_server": "smtp.example.com",
                        "email_sender": "from@example.com"
                    }
                },
                {
                    "id": "google",
                    "name": "Google",
                    "active": false,
                    "url": "https://www.google.com"
                }
            ],
            "playwright": {"max_network_retries": 2},
            "email": {"smtp_port": 465}
        }"#
    }

    #[test]
    fn test_parse_partial_sections_uses_defaults() {
        let settings = Settings::from_json(sample_json()).unwrap();
        assert_eq!(settings.app.width, 800);
        assert_eq!(settings.general.log_level, "debug");
        assert_eq!(settings.general.log_retention, 30);
        assert_eq!(settings.playwright.max_network_retries, 2);
        assert_eq!(settings.playwright.page_timeout, 10_000);
        assert_eq!(settings.email.smtp_port, 465);
        assert!(settings.email.use_tls);
    }

    #[test]
    fn test_active_scenarios_and_lookup() {
        let settings = Settings::from_json(sample_json()).unwrap();
        let active: Vec<&str> = settings.active_scenarios().map(|s| s.id.as_str()).collect();
        assert_eq!(active, vec!["urtica"]);
        assert_eq!(settings.scenario("google").unwrap().name, "Google");
        assert!(settings.scenario("missing").is_none());
    }

    #[test]
    fn test_sample_validates_cleanly() {
        let settings = Settings::from_json(sample_json()).unwrap();
        assert_eq!(settings.validate(), vec![]);
    }

    #[test]
    fn test_send_emails_requires_recipient() {
        let mut settings = Settings::from_json(sample_json()).unwrap();
        settings.scenarios[0].settings.email_recipient.clear();

        let issues = settings.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].scenario.as_deref(), Some("urtica"));
        assert!(issues[0].message.contains("email_recipient"));
    }

    #[test]
    fn test_reversed_dates_are_reported() {
        let mut settings = Settings::from_json(sample_json()).unwrap();
        settings.scenarios[0].settings.date_from = Some("2026-10-20".into());
        settings.scenarios[0].settings.date_to = Some("2026-10-01".into());

        let issues = settings.validate();
        assert!(issues
            .iter()
            .any(|i| i.scenario.as_deref() == Some("urtica") && i.message.contains("date_from")));
    }

    #[test]
    fn test_duplicate_ids_are_reported() {
        let mut settings = Settings::from_json(sample_json()).unwrap();
        let copy = settings.scenarios[1].clone();
        settings.scenarios.push(copy);

        let issues = settings.validate();
        assert!(issues.iter().any(|i| i.message.contains("重複")));
    }

    #[test]
    fn test_add_update_remove_scenario() {
        let mut settings = Settings::default();
        settings
            .add_scenario(Scenario::new("a", "A", "https://a.example"))
            .unwrap();
        assert!(settings
            .add_scenario(Scenario::new("a", "A2", "https://a.example"))
            .is_err());

        let mut updated = Scenario::new("a", "Renamed", "https://a.example");
        updated.active = false;
        settings.update_scenario("a", updated).unwrap();
        assert_eq!(settings.scenario("a").unwrap().name, "Renamed");
        assert!(settings
            .update_scenario("b", Scenario::new("b", "B", "https://b.example"))
            .is_err());

        assert!(settings.remove_scenario("a").is_some());
        assert!(settings.remove_scenario("a").is_none());
        assert!(settings.scenarios.is_empty());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.json");

        let created = Settings::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.scenarios[0].id, "urtica");

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load(dir.path().join("nope.json"));
        assert!(matches!(result, Err(ScraperError::Config(_))));
    }
}
