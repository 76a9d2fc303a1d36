use crate::domain::model::HeaderMatch;
use crate::domain::ports::Requester;
use crate::utils::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

/// header 開頭的 `<!--rfc:category-->` 標記
static RFC_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--rfc:(\w*?)-->").expect("valid rfc prefix regex"));

pub const RFC_REQUEST_TYPE: &str = "request for comment";

/// 訂閱全部 RfC 的特殊分類
pub const ALL_CATEGORY: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfC {
    /// 由 Legobot 指派；尚未指派時為空字串
    pub id: String,
    pub categories: HashSet<String>,
    pub feedback_done: bool,
    pub page: String,
}

impl Requester for RfC {
    fn include_header(&self, header: &str) -> HeaderMatch {
        let Some(caps) = RFC_PREFIX_REGEX.captures(header) else {
            return HeaderMatch::NONE;
        };
        let category = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if category == ALL_CATEGORY {
            HeaderMatch::catch_all()
        } else if self.categories.contains(category) {
            HeaderMatch::included()
        } else {
            HeaderMatch::NONE
        }
    }

    fn page_title(&self) -> &str {
        &self.page
    }

    fn request_type(&self) -> &str {
        RFC_REQUEST_TYPE
    }

    fn rfc_id(&self) -> Option<&str> {
        if self.id.is_empty() {
            None
        } else {
            Some(&self.id)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RfcsDonePage {
    rfcsdone: Vec<String>,
}

/// 已處理過的 RfC ID：開始時從 wiki 載入的，加上本輪完成的
#[derive(Debug, Clone, Default)]
pub struct RfcLedger {
    loaded: HashSet<String>,
    done: HashSet<String>,
}

impl RfcLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let page: RfcsDonePage = serde_json::from_str(content)?;
        Ok(Self {
            loaded: page.rfcsdone.into_iter().collect(),
            done: HashSet::new(),
        })
    }

    pub fn already_done(&self, id: &str) -> bool {
        self.loaded.contains(id) || self.done.contains(id)
    }

    pub fn mark_done<'a>(&mut self, rfcs: impl IntoIterator<Item = &'a RfC>) {
        for rfc in rfcs {
            if !rfc.id.is_empty() {
                self.done.insert(rfc.id.clone());
            }
        }
    }

    /// 本輪完成的集合與載入時不同時才需要寫回；已離開分類的舊 ID 會在寫回時被丟掉
    pub fn is_changed(&self) -> bool {
        self.done != self.loaded
    }

    pub fn to_json(&self) -> Result<String> {
        let ids: BTreeSet<&String> = self.done.iter().collect();
        let page = RfcsDonePage {
            rfcsdone: ids.into_iter().cloned().collect(),
        };
        Ok(serde_json::to_string(&page)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc(categories: &[&str]) -> RfC {
        RfC {
            id: "ABC1234".to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            feedback_done: false,
            page: "Talk:Example".to_string(),
        }
    }

    #[test]
    fn test_include_header() {
        let rfc = rfc(&["bio", "hist"]);
        assert_eq!(rfc.include_header("<!--rfc:bio-->Biographies"), HeaderMatch::included());
        assert_eq!(rfc.include_header("<!--rfc:sci-->Science"), HeaderMatch::NONE);
        assert_eq!(rfc.include_header("<!--rfc:all-->All RfCs"), HeaderMatch::catch_all());
        assert_eq!(rfc.include_header("<!--gan-->History"), HeaderMatch::NONE);
    }

    #[test]
    fn test_rfc_id_absent_when_unassigned() {
        let mut rfc = rfc(&[]);
        assert_eq!(rfc.rfc_id(), Some("ABC1234"));
        rfc.id.clear();
        assert_eq!(rfc.rfc_id(), None);
    }

    #[test]
    fn test_ledger() {
        let mut ledger = RfcLedger::from_json(r#"{"rfcsdone":["OLD1","KEEP2"]}"#).unwrap();
        assert!(ledger.already_done("OLD1"));
        assert!(!ledger.already_done("NEW3"));

        let mut keep = rfc(&[]);
        keep.id = "KEEP2".to_string();
        let mut new = rfc(&[]);
        new.id = "NEW3".to_string();
        ledger.mark_done([&keep, &new]);

        assert!(ledger.already_done("NEW3"));
        assert!(ledger.is_changed());
        assert_eq!(ledger.to_json().unwrap(), r#"{"rfcsdone":["KEEP2","NEW3"]}"#);
    }

    #[test]
    fn test_ledger_unchanged() {
        let mut ledger = RfcLedger::from_json(r#"{"rfcsdone":["A1"]}"#).unwrap();
        let mut a = rfc(&[]);
        a.id = "A1".to_string();
        ledger.mark_done([&a]);
        assert!(!ledger.is_changed());
    }
}
