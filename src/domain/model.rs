use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 一筆訂閱：同一個使用者可以在不同的 header 底下各有一筆
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub username: String,
    pub header: String,
    /// 每月訊息上限；`None` 代表不限
    pub limit: Option<u32>,
}

impl Subscriber {
    pub fn new(username: impl Into<String>, header: impl Into<String>, limit: Option<u32>) -> Self {
        Self {
            username: username.into(),
            header: header.into(),
            limit,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limit.is_some()
    }
}

/// header -> username -> count
pub type CounterMap = BTreeMap<String, BTreeMap<String, u32>>;

/// 寄送次數的持久化格式，例如
/// `{"month":"2020-05","headers":{"category":{"username":8}}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub month: String,
    #[serde(default)]
    pub headers: CounterMap,
}

impl CounterSnapshot {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `include_header` 的結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderMatch {
    pub include: bool,
    pub catch_all: bool,
}

impl HeaderMatch {
    pub const NONE: HeaderMatch = HeaderMatch {
        include: false,
        catch_all: false,
    };

    pub fn included() -> Self {
        Self {
            include: true,
            catch_all: false,
        }
    }

    pub fn catch_all() -> Self {
        Self {
            include: true,
            catch_all: true,
        }
    }
}

/// API 查詢回來的一個頁面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiPage {
    pub page_id: u64,
    pub title: String,
    pub content: Option<String>,
    /// 加入分類的時間戳（只有分類成員查詢才有）
    pub categorised_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageQuery {
    /// 所有嵌入某模板的頁面
    EmbeddedIn { template: String },
    /// 某分類的成員，依加入時間由新到舊，`start` 比 `end` 新
    CategoryMembers {
        category: String,
        start: String,
        end: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditTarget {
    PageId(String),
    Title(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub target: EditTarget,
    /// 設定時會以新段落的方式加入
    pub section_title: Option<String>,
    pub summary: String,
    pub text: String,
    pub minor: bool,
    pub follow_redirects: bool,
}

impl EditRequest {
    pub fn replace_page(page_id: impl Into<String>, summary: impl Into<String>, text: String) -> Self {
        Self {
            target: EditTarget::PageId(page_id.into()),
            section_title: None,
            summary: summary.into(),
            text,
            minor: false,
            follow_redirects: false,
        }
    }

    pub fn new_section(
        title: impl Into<String>,
        section_title: impl Into<String>,
        summary: impl Into<String>,
        text: String,
    ) -> Self {
        Self {
            target: EditTarget::Title(title.into()),
            section_title: Some(section_title.into()),
            summary: summary.into(),
            text,
            minor: false,
            follow_redirects: true,
        }
    }
}
