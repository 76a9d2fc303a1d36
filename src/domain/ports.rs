use crate::domain::model::{EditRequest, HeaderMatch, PageQuery, WikiPage};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn subscriptions_page_id(&self) -> &str;
    fn sent_count_page_id(&self) -> &str;
    fn ga_guidelines_page_id(&self) -> &str;
    fn rfcs_done_page_id(&self) -> &str;
    /// 每個項目要通知的人數範圍 `[min, max)`
    fn message_range(&self) -> (usize, usize);
    fn edit_interval(&self) -> Duration;
    fn max_edits_per_run(&self) -> Option<usize>;
    fn catch_all_penalty(&self) -> f64;
    fn dry_run(&self) -> bool;
}

/// 與 MediaWiki API 的所有互動
#[async_trait]
pub trait WikiApi: Send + Sync {
    async fn fetch_wikitext(&self, page_id: &str) -> Result<String>;
    async fn query_pages(&self, query: &PageQuery) -> Result<Vec<WikiPage>>;
    async fn edit(&self, request: &EditRequest) -> Result<()>;
}

/// 可以觸發通知的項目（RfC、GA 提名）
pub trait Requester: Send + Sync {
    fn include_header(&self, header: &str) -> HeaderMatch;
    fn page_title(&self) -> &str;
    fn request_type(&self) -> &str;
    fn rfc_id(&self) -> Option<&str> {
        None
    }
}
