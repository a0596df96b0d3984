//! e-urtica 請求書ダウンローダー
//!
//! - 設定ファイルのシナリオごとにブラウザでポータルへログインし、請求書PDFを保存
//! - 任意ページの簡易チェック (タイトル・要素数・スクリーンショット)
//! - 結果のメール通知、古いフォルダの削除
//!
//! # 使用例
//!
//! ```rust,ignore
//! use fakturator::{RunOptions, ScenarioService, Settings, SmtpMailer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::load("config/settings.json").unwrap();
//!     let mut service = ScenarioService::new();
//!
//!     let summary = fakturator::run_scenarios(&settings, &RunOptions::default(), &mut service, &SmtpMailer)
//!         .await
//!         .unwrap();
//!     for report in &summary.reports {
//!         println!("{}", report);
//!     }
//! }
//! ```

pub mod browser;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod invoices;
pub mod logging;
pub mod menu;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod retry;
pub mod service;
pub mod settings;
pub mod traits;
pub mod window;

// 主要な型をリエクスポート
pub use config::{ScraperConfig, Timeouts};
pub use error::ScraperError;
pub use invoices::{DownloadReport, InvoiceScraper, RunStats};
pub use notify::{Mailer, Notification, SmtpMailer};
pub use orchestrator::{run_scenarios, NotifyStatus, RunOptions, RunSummary, ScenarioReport, Selection};
pub use probe::{PageProbe, ProbeReport};
pub use retry::RetryPolicy;
pub use service::{ScenarioOutcome, ScenarioRequest, ScenarioService};
pub use settings::{Scenario, ScenarioKind, Settings};
pub use traits::Scraper;
pub use window::{DateRange, DateWindow};
