use async_trait::async_trait;

use crate::error::ScraperError;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// 実行結果
    type Output: Send;

    /// ブラウザ初期化
    async fn initialize(&mut self) -> Result<(), ScraperError>;

    /// ログイン実行
    async fn login(&mut self) -> Result<(), ScraperError>;

    /// ダウンロード / ページ取得
    async fn download(&mut self) -> Result<Self::Output, ScraperError>;

    /// リソース解放
    async fn close(&mut self) -> Result<(), ScraperError>;

    /// 一括実行（initialize → login → download → close）
    ///
    /// 途中で失敗してもブラウザは閉じる。
    async fn execute(&mut self) -> Result<Self::Output, ScraperError> {
        let result = match self.initialize().await {
            Ok(()) => match self.login().await {
                Ok(()) => self.download().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.close().await?;
        result
    }
}
