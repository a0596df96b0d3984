//! e-urtica 請求書ダウンロード

mod scraper;
mod types;

pub use scraper::InvoiceScraper;
pub use types::{
    extract_date, extract_order_number, invoice_file_name, orders_in_range, store_document,
    DownloadReport, OrderDecision, OrderDownloads, OrderRow, ProcessedOrders, RunStats,
    StoredDocument, MAX_DOCUMENT_ERRORS,
};
