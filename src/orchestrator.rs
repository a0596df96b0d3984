//! 有効なシナリオを順番に実行し、結果を通知・集計する

use std::fmt;

use tower::{Service, ServiceExt};
use tracing::{error, info, warn};

use crate::error::ScraperError;
use crate::notify::{Mailer, Notification};
use crate::service::{ScenarioOutcome, ScenarioRequest};
use crate::settings::{Scenario, Settings};

/// 実行対象の選び方
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// active なシナリオすべて
    #[default]
    Active,
    /// ID指定 (active でなくても実行)
    Only(String),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selection: Selection,
    /// 設定の headless を上書き
    pub headless: Option<bool>,
}

/// メール通知の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyStatus {
    Sent,
    Skipped,
    Failed(String),
}

/// シナリオ1件分の結果
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub id: String,
    pub name: String,
    pub result: Result<ScenarioOutcome, String>,
    pub notify: NotifyStatus,
}

impl ScenarioReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(_) => write!(f, "[OK]     {} ({})", self.name, self.id)?,
            Err(e) => write!(f, "[FAILED] {} ({}): {}", self.name, self.id, e)?,
        }
        match &self.notify {
            NotifyStatus::Sent => write!(f, " - mail sent"),
            NotifyStatus::Skipped => Ok(()),
            NotifyStatus::Failed(e) => write!(f, " - mail failed: {}", e),
        }
    }
}

/// 実行全体の結果
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<ScenarioReport>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }
}

/// 対象シナリオを決める
pub fn select_scenarios<'a>(
    settings: &'a Settings,
    selection: &Selection,
) -> Result<Vec<&'a Scenario>, ScraperError> {
    match selection {
        Selection::Active => Ok(settings.active_scenarios().collect()),
        Selection::Only(id) => settings
            .scenario(id)
            .map(|scenario| vec![scenario])
            .ok_or_else(|| ScraperError::Config(format!("シナリオ '{}' が見つかりません", id))),
    }
}

/// シナリオを順番に実行する。1件の失敗で残りを止めない
pub async fn run_scenarios<S, M>(
    settings: &Settings,
    options: &RunOptions,
    service: &mut S,
    mailer: &M,
) -> Result<RunSummary, ScraperError>
where
    S: Service<ScenarioRequest, Response = ScenarioOutcome, Error = ScraperError>,
    M: Mailer + ?Sized,
{
    let scenarios = select_scenarios(settings, &options.selection)?;
    if scenarios.is_empty() {
        warn!("No active scenarios to run");
    }

    let mut summary = RunSummary::default();
    for (index, scenario) in scenarios.iter().enumerate() {
        info!(
            "=== Scenario {}/{}: {} ({}) ===",
            index + 1,
            scenarios.len(),
            scenario.name,
            scenario.id
        );

        let result = run_one(settings, scenario, options, service).await;
        let notify = match &result {
            Ok(outcome) => notify(settings, scenario, outcome, mailer).await,
            Err(e) => {
                error!("Scenario '{}' failed: {}", scenario.id, e);
                NotifyStatus::Skipped
            }
        };

        summary.reports.push(ScenarioReport {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            result: result.map_err(|e| e.to_string()),
            notify,
        });
    }

    info!(
        "Run finished: {} succeeded, {} failed",
        summary.succeeded(),
        summary.failed()
    );
    Ok(summary)
}

async fn run_one<S>(
    settings: &Settings,
    scenario: &Scenario,
    options: &RunOptions,
    service: &mut S,
) -> Result<ScenarioOutcome, ScraperError>
where
    S: Service<ScenarioRequest, Response = ScenarioOutcome, Error = ScraperError>,
{
    let mut request = ScenarioRequest::from_scenario(settings, scenario)?;
    if let Some(headless) = options.headless {
        request = request.with_headless(headless);
    }
    service.ready().await?.call(request).await
}

/// 送信失敗はログと結果に残すだけで、シナリオ自体は成功のまま
async fn notify<M>(
    settings: &Settings,
    scenario: &Scenario,
    outcome: &ScenarioOutcome,
    mailer: &M,
) -> NotifyStatus
where
    M: Mailer + ?Sized,
{
    if !scenario.settings.send_emails {
        return NotifyStatus::Skipped;
    }

    let email = settings.email_for(scenario);
    let notification = Notification::for_outcome(scenario, outcome);
    match mailer.send(&email, &notification).await {
        Ok(()) => NotifyStatus::Sent,
        Err(e) => {
            warn!("Mail for scenario '{}' failed: {}", scenario.id, e);
            NotifyStatus::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeReport;
    use crate::settings::EmailConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &EmailConfig, notification: &Notification) -> Result<(), ScraperError> {
            if self.fail {
                return Err(ScraperError::Notify("connection refused".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((email.smtp_server.clone(), notification.to.clone()));
            Ok(())
        }
    }

    fn settings() -> Settings {
        let mut first = Scenario::new("first", "First", "https://example.com/a");
        first.settings.send_emails = true;
        first.settings.email_recipient = "first@example.com".into();
        first.settings.email_smtp_server = Some("smtp.first.example".into());

        let mut broken = Scenario::new("broken", "Broken", "https://example.com/broken");
        broken.settings.send_emails = true;
        broken.settings.email_recipient = "broken@example.com".into();

        let mut inactive = Scenario::new("inactive", "Inactive", "https://example.com/c");
        inactive.active = false;

        let last = Scenario::new("last", "Last", "https://example.com/d");

        let mut settings = Settings {
            scenarios: vec![first, broken, inactive, last],
            ..Default::default()
        };
        settings.email.smtp_server = "smtp.global.example".into();
        settings
    }

    fn fake_service(
    ) -> impl Service<ScenarioRequest, Response = ScenarioOutcome, Error = ScraperError> {
        tower::service_fn(|req: ScenarioRequest| async move {
            if req.scenario_id == "broken" {
                return Err(ScraperError::Navigation("net::ERR_NAME_NOT_RESOLVED".into()));
            }
            Ok(ScenarioOutcome::Probe(ProbeReport {
                url: req.config.url,
                ..Default::default()
            }))
        })
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining_scenarios() {
        let settings = settings();
        let mailer = RecordingMailer::default();
        let mut service = fake_service();

        let summary = run_scenarios(&settings, &RunOptions::default(), &mut service, &mailer)
            .await
            .unwrap();

        let ids: Vec<&str> = summary.reports.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "broken", "last"]);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.all_ok());

        assert_eq!(summary.reports[0].notify, NotifyStatus::Sent);
        // 失敗したシナリオは通知しない
        assert_eq!(summary.reports[1].notify, NotifyStatus::Skipped);
        assert_eq!(summary.reports[2].notify, NotifyStatus::Skipped);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("smtp.first.example".to_string(), "first@example.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mail_failure_keeps_scenario_successful() {
        let settings = settings();
        let mailer = RecordingMailer {
            fail: true,
            ..Default::default()
        };
        let mut service = fake_service();
        let options = RunOptions {
            selection: Selection::Only("first".into()),
            headless: Some(true),
        };

        let summary = run_scenarios(&settings, &options, &mut service, &mailer)
            .await
            .unwrap();

        assert_eq!(summary.reports.len(), 1);
        assert!(summary.all_ok());
        assert!(matches!(summary.reports[0].notify, NotifyStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_only_selection_runs_inactive_scenario() {
        let settings = settings();
        let mailer = RecordingMailer::default();
        let mut service = fake_service();
        let options = RunOptions {
            selection: Selection::Only("inactive".into()),
            headless: None,
        };

        let summary = run_scenarios(&settings, &options, &mut service, &mailer)
            .await
            .unwrap();
        assert_eq!(summary.reports.len(), 1);
        assert!(summary.reports[0].is_ok());
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_config_error() {
        let settings = settings();
        let mailer = RecordingMailer::default();
        let mut service = fake_service();
        let options = RunOptions {
            selection: Selection::Only("missing".into()),
            headless: None,
        };

        assert!(matches!(
            run_scenarios(&settings, &options, &mut service, &mailer).await,
            Err(ScraperError::Config(_))
        ));
    }

    #[test]
    fn test_report_display() {
        let report = ScenarioReport {
            id: "broken".into(),
            name: "Broken".into(),
            result: Err("timeout".into()),
            notify: NotifyStatus::Skipped,
        };
        assert_eq!(report.to_string(), "[FAILED] Broken (broken): timeout");
    }
}
