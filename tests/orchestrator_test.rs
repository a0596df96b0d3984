use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fakturator::retry::RetryPolicy;
use fakturator::{
    run_scenarios, DownloadReport, NotifyStatus, RunOptions, RunStats, Scenario, ScenarioOutcome,
    ScenarioRequest, ScraperError, Settings,
};
use fakturator::notify::{Mailer, Notification};
use fakturator::settings::EmailConfig;

struct NoMail;

#[async_trait::async_trait]
impl Mailer for NoMail {
    async fn send(&self, _: &EmailConfig, _: &Notification) -> Result<(), ScraperError> {
        Err(ScraperError::Notify("unreachable".into()))
    }
}

#[tokio::test]
async fn test_network_failures_are_retried_then_reported() {
    let mut scenario = Scenario::new("urtica", "Urtica", "https://e-urtica.pl/authorization/login");
    scenario.settings.login = "a@example.com".into();
    scenario.settings.password = "secret".into();
    let next = Scenario::new("google", "Google", "https://www.google.com");

    let mut settings = Settings {
        scenarios: vec![scenario, next],
        ..Default::default()
    };
    settings.playwright.max_network_retries = 2;
    settings.playwright.network_retry_delay = 0;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut service = tower::service_fn(move |req: ScenarioRequest| {
        let counter = counter.clone();
        async move {
            if req.scenario_id == "google" {
                return Ok(ScenarioOutcome::Invoices(DownloadReport {
                    stats: RunStats::default(),
                    ..Default::default()
                }));
            }
            req.config
                .retry
                .run("open login page", |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<ScenarioOutcome, _>(ScraperError::Navigation("offline".into()))
                    }
                })
                .await
        }
    });

    let summary = run_scenarios(&settings, &RunOptions::default(), &mut service, &NoMail)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.failed(), 1);
    assert!(summary.reports[0]
        .result
        .as_ref()
        .unwrap_err()
        .contains("3回試行後も失敗"));
    assert!(summary.reports[1].is_ok());
    assert_eq!(summary.reports[1].notify, NotifyStatus::Skipped);
}

#[test]
fn test_retry_policy_from_settings() {
    let settings = Settings::with_default_scenario();
    let config = fakturator::ScraperConfig::from_scenario(&settings, &settings.scenarios[0]).unwrap();
    assert_eq!(config.retry, RetryPolicy::new(3, Duration::from_secs(5)));
}
