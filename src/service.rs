use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::invoices::{DownloadReport, InvoiceScraper};
use crate::probe::{PageProbe, ProbeReport};
use crate::settings::{Scenario, ScenarioKind, Settings};
use crate::traits::Scraper;

/// シナリオ1件の実行リクエスト
#[derive(Debug, Clone)]
pub struct ScenarioRequest {
    pub scenario_id: String,
    pub kind: ScenarioKind,
    pub config: ScraperConfig,
}

impl ScenarioRequest {
    pub fn new(kind: ScenarioKind, config: ScraperConfig) -> Self {
        Self {
            scenario_id: config.scenario_id.clone(),
            kind,
            config,
        }
    }

    /// 設定ファイルのシナリオからリクエストを組み立てる
    pub fn from_scenario(settings: &Settings, scenario: &Scenario) -> Result<Self, ScraperError> {
        let config = ScraperConfig::from_scenario(settings, scenario)?;
        Ok(Self::new(scenario.kind(), config))
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }
}

/// シナリオ実行結果
#[derive(Debug, Clone)]
pub enum ScenarioOutcome {
    Invoices(DownloadReport),
    Probe(ProbeReport),
}

impl ScenarioOutcome {
    pub fn summary(&self) -> String {
        match self {
            ScenarioOutcome::Invoices(report) => report.summary(),
            ScenarioOutcome::Probe(report) => report.summary(),
        }
    }
}

/// tower::Serviceを実装したシナリオ実行サービス
#[derive(Debug, Clone, Default)]
pub struct ScenarioService {}

impl ScenarioService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<ScenarioRequest> for ScenarioService {
    type Response = ScenarioOutcome;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ScenarioRequest) -> Self::Future {
        info!(
            "Scenario request received: id={}, kind={:?}",
            req.scenario_id, req.kind
        );

        Box::pin(async move {
            let limit = req.config.timeouts.run;
            let id = req.scenario_id.clone();

            let run = async move {
                match req.kind {
                    ScenarioKind::Invoices => {
                        let mut scraper = InvoiceScraper::new(req.config);
                        scraper.execute().await.map(ScenarioOutcome::Invoices)
                    }
                    ScenarioKind::Probe => {
                        let mut probe = PageProbe::new(req.config);
                        probe.execute().await.map(ScenarioOutcome::Probe)
                    }
                }
            };

            let outcome = tokio::time::timeout(limit, run).await.map_err(|_| {
                ScraperError::Timeout(format!("シナリオ '{}' が {:?} 以内に終わりませんでした", id, limit))
            })??;

            info!("Scenario '{}' finished", id);
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_scenario_request_builder() {
        let config = ScraperConfig::new("user", "pass").with_download_path("/tmp/faktury");
        let req = ScenarioRequest::new(ScenarioKind::Invoices, config).with_headless(false);

        assert_eq!(req.kind, ScenarioKind::Invoices);
        assert_eq!(req.config.login, "user");
        assert_eq!(req.config.download_path, PathBuf::from("/tmp/faktury"));
        assert!(!req.config.headless);
    }

    #[test]
    fn test_scenario_request_from_settings() {
        let mut settings = Settings::with_default_scenario();
        settings
            .add_scenario(Scenario::new("google", "Google", "https://www.google.com"))
            .unwrap();

        let urtica = ScenarioRequest::from_scenario(&settings, settings.scenario("urtica").unwrap())
            .unwrap();
        assert_eq!(urtica.scenario_id, "urtica");
        assert_eq!(urtica.kind, ScenarioKind::Invoices);

        let google = ScenarioRequest::from_scenario(&settings, settings.scenario("google").unwrap())
            .unwrap();
        assert_eq!(google.kind, ScenarioKind::Probe);
    }

    #[test]
    fn test_outcome_summary_delegates() {
        let outcome = ScenarioOutcome::Probe(ProbeReport {
            title: "Example".into(),
            ..Default::default()
        });
        assert!(outcome.summary().contains("Title: Example"));
    }
}
