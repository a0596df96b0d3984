//! 実行結果のメール通知 (SMTP)

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::error::ScraperError;
use crate::service::ScenarioOutcome;
use crate::settings::{EmailConfig, Scenario};

/// 送信するメール1通分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl Notification {
    /// シナリオ結果から通知を作る
    pub fn for_outcome(scenario: &Scenario, outcome: &ScenarioOutcome) -> Self {
        let (subject, attachments) = match outcome {
            ScenarioOutcome::Invoices(report) => {
                let files = report
                    .files
                    .iter()
                    .filter(|path| is_invoice_attachment(path))
                    .cloned()
                    .collect();
                (
                    format!(
                        "{}: {} invoice(s) downloaded",
                        scenario.name, report.stats.downloaded_invoices
                    ),
                    files,
                )
            }
            ScenarioOutcome::Probe(report) => (
                format!("{}: page report", scenario.name),
                report.screenshot.iter().cloned().collect(),
            ),
        };

        Self {
            to: scenario.settings.email_recipient.clone(),
            subject,
            body: format!("Scenario: {} ({})\n\n{}", scenario.name, scenario.id, outcome.summary()),
            attachments,
        }
    }
}

/// 請求書として添付する拡張子か (.pdf / .xml)
pub fn is_invoice_attachment(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            ext == "pdf" || ext == "xml"
        })
        .unwrap_or(false)
}

fn content_type_for(path: &Path) -> Result<ContentType, ScraperError> {
    let mime = match path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    };
    ContentType::parse(mime).map_err(|e| ScraperError::Notify(format!("Content-Type: {}", e)))
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ScraperError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| ScraperError::Notify(format!("不正なアドレス '{}': {}", address, e)))
}

/// 通知からMIMEメッセージを組み立てる (添付ファイルはここで読み込む)
pub fn build_message(sender: &str, notification: &Notification) -> Result<Message, ScraperError> {
    if notification.to.trim().is_empty() {
        return Err(ScraperError::Notify("宛先が空です".into()));
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(notification.body.clone()));

    for path in &notification.attachments {
        let content = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        body = body.singlepart(Attachment::new(filename).body(content, content_type_for(path)?));
    }

    Message::builder()
        .from(parse_mailbox(sender)?)
        .to(parse_mailbox(&notification.to)?)
        .subject(notification.subject.clone())
        .multipart(body)
        .map_err(|e| ScraperError::Notify(format!("メッセージ作成失敗: {}", e)))
}

/// メール送信の抽象
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &EmailConfig, notification: &Notification) -> Result<(), ScraperError>;
}

/// lettre による SMTP 送信
#[derive(Debug, Clone, Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    fn transport(email: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, ScraperError> {
        if email.smtp_server.trim().is_empty() {
            return Err(ScraperError::Notify("SMTPサーバーが未設定です".into()));
        }

        let builder = if email.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.smtp_server)
                .map_err(|e| ScraperError::Notify(format!("SMTP TLS設定失敗: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&email.smtp_server)
        };

        let builder = builder
            .port(email.smtp_port)
            .timeout(Some(Duration::from_secs(email.timeout_secs)));

        // パスワードが空なら認証なしで送る
        let builder = if email.password.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(email.sender.clone(), email.password.clone()))
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &EmailConfig, notification: &Notification) -> Result<(), ScraperError> {
        let message = build_message(&email.sender, notification)?;
        let transport = Self::transport(email)?;
        debug!(
            "Sending mail via {}:{} (tls={})",
            email.smtp_server, email.smtp_port, email.use_tls
        );

        transport
            .send(message)
            .await
            .map_err(|e| ScraperError::Notify(format!("送信失敗: {}", e)))?;

        info!(
            "Mail sent to {} ({} attachment(s))",
            notification.to,
            notification.attachments.len()
        );
        Ok(())
    }
}
