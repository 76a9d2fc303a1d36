use crate::domain::ports::Storage;
use crate::utils::error::{BotError, Result};
use chrono::DateTime;

const RUNFILE_EXTENSION: &str = ".frsrunfile";

/// 上次處理到的位置：最新一頁加入分類的時間與頁面 ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMark {
    pub timestamp: Option<String>,
    pub page_id: Option<String>,
}

impl RunMark {
    pub fn new(timestamp: impl Into<String>, page_id: Option<String>) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            page_id,
        }
    }

    /// `timestamp;pageid`，pageid 可以是空的
    pub fn parse(category: &str, content: &str) -> Result<Self> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(Self::default());
        }

        let (timestamp, page_id) = content.split_once(';').unwrap_or((content, ""));
        if DateTime::parse_from_rfc3339(timestamp).is_err() {
            return Err(BotError::RunfileError {
                category: category.to_string(),
                message: format!("'{}' is not an RFC 3339 timestamp", timestamp),
            });
        }

        Ok(Self {
            timestamp: Some(timestamp.to_string()),
            page_id: Some(page_id.to_string()).filter(|id| !id.is_empty()),
        })
    }

    pub fn serialize(&self) -> String {
        format!(
            "{};{}",
            self.timestamp.as_deref().unwrap_or_default(),
            self.page_id.as_deref().unwrap_or_default()
        )
    }
}

pub fn runfile_name(category: &str) -> String {
    format!("{}{}", slugify(category), RUNFILE_EXTENSION)
}

/// 小寫，非英數字元換成 `-`，連續的 `-` 合併
///
/// 只用在固定的分類名稱上；標點不同的名稱可能得到相同的 slug。
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// 以 `Storage` 保存每個分類的 runfile
pub struct Runfiles<S: Storage> {
    storage: S,
}

impl<S: Storage> Runfiles<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// 檔案不存在時建立空檔並回傳空的位置
    pub async fn load(&self, category: &str) -> Result<RunMark> {
        let name = runfile_name(category);
        match self.storage.read_file(&name).await {
            Ok(data) => RunMark::parse(category, &String::from_utf8_lossy(&data)),
            Err(BotError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("📄 No runfile for {}, creating {}", category, name);
                self.storage.write_file(&name, b"").await?;
                Ok(RunMark::default())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save(&self, category: &str, mark: &RunMark) -> Result<()> {
        let name = runfile_name(category);
        tracing::debug!("Writing runfile {}", name);
        self.storage
            .write_file(&name, mark.serialize().as_bytes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Category:Good article nominees"), "category-good-article-nominees");
        assert_eq!(slugify("  Foo -- Bar!  "), "foo-bar");
    }

    #[test]
    fn test_parse_mark() {
        let mark = RunMark::parse("c", "2020-05-01T12:00:00Z;12345").unwrap();
        assert_eq!(mark.timestamp.as_deref(), Some("2020-05-01T12:00:00Z"));
        assert_eq!(mark.page_id.as_deref(), Some("12345"));

        let mark = RunMark::parse("c", "2020-05-01T12:00:00Z;").unwrap();
        assert_eq!(mark.page_id, None);

        let mark = RunMark::parse("c", "2020-05-01T12:00:00Z").unwrap();
        assert_eq!(mark.page_id, None);

        assert_eq!(RunMark::parse("c", "").unwrap(), RunMark::default());
        assert!(RunMark::parse("c", "yesterday;1").is_err());
    }

    #[tokio::test]
    async fn test_load_creates_missing_runfile() {
        let dir = TempDir::new().unwrap();
        let runfiles = Runfiles::new(LocalStorage::new(dir.path().to_str().unwrap().to_string()));

        let mark = runfiles.load("Category:Good article nominees").await.unwrap();
        assert_eq!(mark, RunMark::default());
        assert!(dir.path().join("category-good-article-nominees.frsrunfile").exists());

        let saved = RunMark::new("2020-05-01T12:00:00Z", Some("42".to_string()));
        runfiles.save("Category:Good article nominees", &saved).await.unwrap();
        let loaded = runfiles.load("Category:Good article nominees").await.unwrap();
        assert_eq!(loaded, saved);
    }
}
