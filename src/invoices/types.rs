//! 請求書ダウンロード関連の型定義と行テキスト解析

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::ScraperError;
use crate::window::{parse_portal_date, DateRange};

/// 注文一覧の1行 (範囲内と判定されたもの)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub date: NaiveDate,
    pub order_number: String,
}

/// 実行統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub processed_orders: u32,
    pub downloaded_invoices: u32,
    pub errors: u32,
}

/// 請求書ダウンロード結果
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub stats: RunStats,
    /// 保存した請求書ファイル
    pub files: Vec<PathBuf>,
    pub ranges: Vec<DateRange>,
    pub download_path: PathBuf,
}

impl DownloadReport {
    /// メール本文・ログ用の要約
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Processed orders: {}", self.stats.processed_orders),
            format!("Downloaded invoices: {}", self.stats.downloaded_invoices),
            format!("Errors: {}", self.stats.errors),
            format!("Saved to: {}", self.download_path.display()),
        ];
        for range in &self.ranges {
            lines.push(format!("Range: {}", range));
        }
        lines.join("\n")
    }
}

/// 保存結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredDocument {
    Invoice(PathBuf),
    /// 請求書ではなくプライバシーポリシーだったもの (別名で保存)
    PrivacyPolicy(PathBuf),
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Data:\s*(\d{2}\.\d{2}\.\d{4})").expect("valid date regex"))
}

fn order_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Nr zamówienia:\s*(ZS/\d+/\d+/UR)").expect("valid order regex")
    })
}

/// "Data: DD.MM.YYYY" から日付を取り出す
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    let captures = date_pattern().captures(text)?;
    parse_portal_date(&captures[1])
}

/// "Nr zamówienia: ZS/…/…/UR" から注文番号を取り出す
pub fn extract_order_number(text: &str) -> Option<String> {
    order_pattern()
        .captures(text)
        .map(|captures| captures[1].to_string())
}

/// 行のセルテキスト (先頭2セル) から範囲内の注文を抽出
pub fn orders_in_range(rows: &[Vec<String>], range: &DateRange) -> Vec<OrderRow> {
    rows.iter()
        .filter(|cells| cells.len() >= 2)
        .filter_map(|cells| {
            let date = extract_date(&cells[0])?;
            let order_number = extract_order_number(&cells[1])?;
            Some(OrderRow { date, order_number })
        })
        .filter(|order| range.contains(order.date))
        .collect()
}

/// 注文番号から保存ファイル名を作る。2件目以降は連番を付ける
pub fn invoice_file_name(order_number: &str, sequence: usize) -> String {
    let base = order_number.replace('/', "_");
    if sequence <= 1 {
        format!("faktura_{}.pdf", base)
    } else {
        format!("faktura_{}_{}.pdf", base, sequence)
    }
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// 先頭1KiBにプライバシーポリシーの文言があるか
pub fn looks_like_privacy_policy(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    String::from_utf8_lossy(head)
        .to_lowercase()
        .contains("prywatności")
}

pub fn privacy_policy_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    target.with_file_name(format!("{}_polityka_prywatnosci.pdf", stem))
}

/// ダウンロードした内容を検査して保存
pub fn store_document(bytes: &[u8], target: &Path) -> Result<StoredDocument, ScraperError> {
    if !is_pdf(bytes) {
        return Err(ScraperError::Download(format!(
            "{} はPDFではありません ({} bytes)",
            target.display(),
            bytes.len()
        )));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if looks_like_privacy_policy(bytes) {
        let path = privacy_policy_path(target);
        std::fs::write(&path, bytes)?;
        return Ok(StoredDocument::PrivacyPolicy(path));
    }

    std::fs::write(target, bytes)?;
    Ok(StoredDocument::Invoice(target.to_path_buf()))
}

/// 注文1件あたり許容するドキュメントエラー数
pub const MAX_DOCUMENT_ERRORS: u32 = 3;

/// 注文を処理するかどうかの判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderDecision {
    Process,
    /// この実行で既に扱った注文
    AlreadyProcessed,
    /// 1件目の請求書ファイルが既にある
    AlreadySaved(PathBuf),
}

/// 実行中に扱った注文番号
#[derive(Debug, Default)]
pub struct ProcessedOrders {
    seen: HashSet<String>,
}

impl ProcessedOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注文を記録し、処理すべきか返す。失敗しても同じ注文は二度と処理しない
    pub fn claim(&mut self, order_number: &str, folder: &Path) -> OrderDecision {
        if !self.seen.insert(order_number.to_string()) {
            return OrderDecision::AlreadyProcessed;
        }
        let first = folder.join(invoice_file_name(order_number, 1));
        if first.exists() {
            return OrderDecision::AlreadySaved(first);
        }
        OrderDecision::Process
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// 注文1件分のダウンロード状況 (保存数とエラー数)
#[derive(Debug)]
pub struct OrderDownloads {
    order_number: String,
    folder: PathBuf,
    saved: u32,
    errors: u32,
}

impl OrderDownloads {
    pub fn new(order_number: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            order_number: order_number.into(),
            folder: folder.into(),
            saved: 0,
            errors: 0,
        }
    }

    /// 次の請求書の保存先。プライバシーポリシーは連番を消費しない
    pub fn next_target(&self) -> PathBuf {
        self.folder
            .join(invoice_file_name(&self.order_number, self.saved as usize + 1))
    }

    /// ダウンロード結果を数えてそのまま返す
    pub fn record(
        &mut self,
        result: Result<StoredDocument, ScraperError>,
    ) -> Result<StoredDocument, ScraperError> {
        match &result {
            Ok(StoredDocument::Invoice(_)) => self.saved += 1,
            Ok(StoredDocument::PrivacyPolicy(_)) => {}
            Err(_) => self.errors += 1,
        }
        result
    }

    pub fn should_give_up(&self) -> bool {
        self.errors >= MAX_DOCUMENT_ERRORS
    }

    pub fn saved(&self) -> u32 {
        self.saved
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(first: &str, second: &str) -> Vec<String> {
        vec![first.to_string(), second.to_string()]
    }

    #[test]
    fn test_extract_date_and_order_number() {
        assert_eq!(
            extract_date("Zamówienie  Data: 21.10.2026 12:30"),
            Some(date(2026, 10, 21))
        );
        assert_eq!(extract_date("21.10.2026"), None);
        assert_eq!(extract_date("Data: 31.02.2026"), None);

        assert_eq!(
            extract_order_number("Nr zamówienia: ZS/123/2026/UR  Status"),
            Some("ZS/123/2026/UR".to_string())
        );
        assert_eq!(extract_order_number("Nr zamówienia: FV/1/2/UR"), None);
    }

    #[test]
    fn test_orders_in_range_filters_rows() {
        let range = DateRange::new(date(2026, 10, 18), date(2026, 10, 24));
        let rows = vec![
            row("Data: 18.10.2026", "Nr zamówienia: ZS/1/2026/UR"),
            row("Data: 25.10.2026", "Nr zamówienia: ZS/2/2026/UR"),
            row("Data: 20.10.2026", "brak numeru"),
            vec!["Data: 20.10.2026".to_string()],
            row("Data: 24.10.2026", "Nr zamówienia: ZS/3/2026/UR"),
        ];

        let orders = orders_in_range(&rows, &range);
        let numbers: Vec<&str> = orders.iter().map(|o| o.order_number.as_str()).collect();
        assert_eq!(numbers, vec!["ZS/1/2026/UR", "ZS/3/2026/UR"]);
        assert_eq!(orders[1].date, date(2026, 10, 24));
    }

    #[test]
    fn test_invoice_file_name() {
        assert_eq!(invoice_file_name("ZS/12/2026/UR", 1), "faktura_ZS_12_2026_UR.pdf");
        assert_eq!(invoice_file_name("ZS/12/2026/UR", 2), "faktura_ZS_12_2026_UR_2.pdf");
    }

    #[test]
    fn test_store_document_variants() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2026-10-18_do_2026-10-24").join("faktura_ZS_1_2026_UR.pdf");

        let stored = store_document(b"%PDF-1.7 invoice body", &target).unwrap();
        assert_eq!(stored, StoredDocument::Invoice(target.clone()));
        assert!(target.exists());

        let policy = "%PDF-1.4 Polityka prywatności".as_bytes();
        let stored = store_document(policy, &target).unwrap();
        let expected = dir
            .path()
            .join("2026-10-18_do_2026-10-24")
            .join("faktura_ZS_1_2026_UR_polityka_prywatnosci.pdf");
        assert_eq!(stored, StoredDocument::PrivacyPolicy(expected.clone()));
        assert!(expected.exists());

        let err = store_document(b"<html>login</html>", &dir.path().join("x.pdf"));
        assert!(matches!(err, Err(ScraperError::Download(_))));
        assert!(!dir.path().join("x.pdf").exists());
    }

    #[test]
    fn test_report_summary_mentions_counts() {
        let report = DownloadReport {
            stats: RunStats {
                processed_orders: 3,
                downloaded_invoices: 2,
                errors: 1,
            },
            files: vec![],
            ranges: vec![DateRange::new(date(2026, 10, 18), date(2026, 10, 24))],
            download_path: PathBuf::from("./faktury"),
        };
        let summary = report.summary();
        assert!(summary.contains("Processed orders: 3"));
        assert!(summary.contains("Downloaded invoices: 2"));
        assert!(summary.contains("18.10.2026 - 24.10.2026"));
    }

    #[test]
    fn test_claim_skips_repeated_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut processed = ProcessedOrders::new();
        assert_eq!(processed.claim("ZS/1/2026/UR", dir.path()), OrderDecision::Process);
        assert_eq!(
            processed.claim("ZS/1/2026/UR", dir.path()),
            OrderDecision::AlreadyProcessed
        );
        assert_eq!(processed.claim("ZS/2/2026/UR", dir.path()), OrderDecision::Process);
        assert_eq!(processed.len(), 2);
    }

    #[test]
    fn test_claim_skips_order_with_saved_invoice() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("faktura_ZS_5_2026_UR.pdf");
        std::fs::write(&existing, b"%PDF old").unwrap();

        let mut processed = ProcessedOrders::new();
        assert_eq!(
            processed.claim("ZS/5/2026/UR", dir.path()),
            OrderDecision::AlreadySaved(existing)
        );
        // 既存ファイルで飛ばした注文も記録される
        assert_eq!(
            processed.claim("ZS/5/2026/UR", dir.path()),
            OrderDecision::AlreadyProcessed
        );
    }

    #[test]
    fn test_privacy_policy_does_not_consume_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut order = OrderDownloads::new("ZS/7/2026/UR", dir.path());

        let first = order.next_target();
        assert_eq!(first, dir.path().join("faktura_ZS_7_2026_UR.pdf"));
        let stored = order.record(store_document(b"%PDF-1.7 invoice one", &first)).unwrap();
        assert_eq!(stored, StoredDocument::Invoice(first));

        let second = order.next_target();
        assert_eq!(second, dir.path().join("faktura_ZS_7_2026_UR_2.pdf"));
        let policy = "%PDF-1.4 Polityka prywatności".as_bytes();
        let stored = order.record(store_document(policy, &second)).unwrap();
        assert_eq!(
            stored,
            StoredDocument::PrivacyPolicy(dir.path().join("faktura_ZS_7_2026_UR_2_polityka_prywatnosci.pdf"))
        );
        assert_eq!(order.saved(), 1);

        let third = order.next_target();
        assert_eq!(third, second);
        order.record(store_document(b"%PDF-1.7 invoice two", &third)).unwrap();
        assert_eq!(order.saved(), 2);
        assert!(dir.path().join("faktura_ZS_7_2026_UR_2.pdf").exists());
        assert!(!dir.path().join("faktura_ZS_7_2026_UR_3.pdf").exists());
        assert_eq!(order.next_target(), dir.path().join("faktura_ZS_7_2026_UR_3.pdf"));
    }

    #[test]
    fn test_gives_up_after_three_document_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut order = OrderDownloads::new("ZS/8/2026/UR", dir.path());

        for _ in 0..2 {
            let target = order.next_target();
            assert!(order.record(store_document(b"<html></html>", &target)).is_err());
        }
        assert_eq!(order.errors(), 2);
        assert!(!order.should_give_up());

        // 成功してもエラー数は減らない
        let target = order.next_target();
        order.record(store_document(b"%PDF-1.7", &target)).unwrap();
        assert!(!order.should_give_up());

        order
            .record(Err(ScraperError::Timeout("download".into())))
            .unwrap_err();
        assert!(order.should_give_up());
        assert_eq!(order.saved(), 1);
    }
}
