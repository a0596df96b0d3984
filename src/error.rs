use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("ログインエラー: {0}")]
    Login(String),

    #[error("ダウンロードエラー: {0}")]
    Download(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("請求書データなし: {0}")]
    NoInvoiceData(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("設定ファイル解析エラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("日付形式エラー: {0}")]
    InvalidDate(String),

    #[error("メール送信エラー: {0}")]
    Notify(String),

    #[error("{attempts}回試行後も失敗: {message}")]
    RetriesExhausted { attempts: u32, message: String },
}

impl ScraperError {
    /// ネットワーク起因でリトライ可能なエラーか
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScraperError::Navigation(_) | ScraperError::Timeout(_) | ScraperError::JavaScript(_)
        )
    }
}
