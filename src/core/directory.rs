use crate::core::counter::SendCounter;
use crate::domain::model::{CounterSnapshot, Subscriber};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// 一個 `===Header===` 段落標題
static HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^===([^=].*?)===[ \t]*\r?$").expect("valid header regex"));

/// `{{frs user|...}}`，參數之後再以 `|` 切開：`Name` 或 `Name|limit`
static USER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{\s*frs user\s*\|([^}]*)\}\}").expect("valid user regex")
});

/// 未指定上限時的預設值
pub const DEFAULT_LIMIT: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateReport {
    pub headers: usize,
    pub subscribers: usize,
    pub skipped: usize,
}

/// 訂閱目錄：header -> 訂閱者清單，以及本月的寄送計數
#[derive(Debug, Default)]
pub struct Directory {
    subscriptions: HashMap<String, Vec<Subscriber>>,
    headers: Vec<String>,
    counter: SendCounter,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_wikitext(text: &str) -> Self {
        let mut directory = Self::new();
        directory.populate(text);
        directory
    }

    /// 解析訂閱清單。格式錯誤的單筆訂閱只會被略過並記錄警告。
    pub fn populate(&mut self, text: &str) -> PopulateReport {
        let mut report = PopulateReport::default();
        let headers: Vec<_> = HEADER_REGEX.captures_iter(text).collect();

        for (index, caps) in headers.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let header = name.as_str().trim().to_string();
            let block_end = headers
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());
            let block = &text[whole.end()..block_end];
            // 任何層級的標題行（例如 `==Inactive subscribers==`）都會結束這個段落
            let block = block.find("\n=").map_or(block, |end| &block[..end]);

            if !self.subscriptions.contains_key(&header) {
                self.headers.push(header.clone());
            }
            let users = self.subscriptions.entry(header.clone()).or_default();

            for user in USER_REGEX.captures_iter(block) {
                let params: Vec<&str> = user
                    .get(1)
                    .map(|m| m.as_str().split('|').map(str::trim).collect())
                    .unwrap_or_default();
                let username = params.first().copied().unwrap_or_default();
                if params.len() > 2 {
                    tracing::warn!(
                        "⚠️ User {} under '{}' has {} parameters, expected at most 2, skipping",
                        username,
                        header,
                        params.len()
                    );
                    report.skipped += 1;
                    continue;
                }
                if username.is_empty() {
                    tracing::warn!("⚠️ Empty username under header '{}', skipping", header);
                    report.skipped += 1;
                    continue;
                }

                let limit = match parse_limit(params.get(1).copied()) {
                    Ok(limit) => limit,
                    Err(raw) => {
                        tracing::warn!(
                            "⚠️ User {} has an invalid limit of '{}' under '{}', ignoring",
                            username,
                            raw,
                            header
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                if users.iter().any(|existing| existing.username == username) {
                    tracing::warn!(
                        "⚠️ User {} is listed twice under '{}', keeping the first entry",
                        username,
                        header
                    );
                    report.skipped += 1;
                    continue;
                }

                users.push(Subscriber::new(username, header.clone(), limit));
                report.subscribers += 1;
            }
        }

        report.headers = self.headers.len();
        tracing::info!(
            "📋 Loaded {} subscriptions across {} headers ({} skipped)",
            report.subscribers,
            report.headers,
            report.skipped
        );
        report
    }

    pub fn list_headers(&self) -> &[String] {
        &self.headers
    }

    pub fn subscribers(&self, header: &str) -> &[Subscriber] {
        self.subscriptions
            .get(header)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_count(&self, header: &str, username: &str) -> u32 {
        self.counter.get(header, username)
    }

    pub fn count_for(&self, subscriber: &Subscriber) -> u32 {
        self.get_count(&subscriber.header, &subscriber.username)
    }

    pub fn exceeds_limit(&self, subscriber: &Subscriber) -> bool {
        match subscriber.limit {
            Some(limit) => self.count_for(subscriber) >= limit,
            None => false,
        }
    }

    pub fn mark_message_sent(&self, subscriber: &Subscriber) -> u32 {
        self.counter
            .increment(&subscriber.header, &subscriber.username)
    }

    pub fn mark_message_unsent(&self, subscriber: &Subscriber) {
        if self
            .counter
            .decrement(&subscriber.header, &subscriber.username)
            .is_none()
        {
            tracing::debug!(
                "Nothing to undo for {} under '{}'",
                subscriber.username,
                subscriber.header
            );
        }
    }

    pub fn load_monthly_counters(&self, snapshot: CounterSnapshot, current_month: &str) -> bool {
        self.counter.load(snapshot, current_month)
    }

    pub fn serialize_counters(&self, current_month: &str) -> CounterSnapshot {
        self.counter.snapshot(current_month)
    }
}

/// `Ok(None)` 代表不限；`Err` 帶回無法解析的原始值
fn parse_limit(raw: Option<&str>) -> std::result::Result<Option<u32>, String> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Some(DEFAULT_LIMIT)),
        Some(raw) => raw,
    };
    match raw.parse::<u32>() {
        Ok(0) => Ok(None),
        Ok(limit) => Ok(Some(limit)),
        Err(_) => Err(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
Intro text that is not part of any header.

===<!--rfc:bio-->Biographies===
* {{frs user|Alice|5}}
* {{frs user|Bob}}
* {{FRS user|Carol|0}}

===<!--rfc:all-->All RfCs===
*{{frs user|Dave|3}}

===Empty header===

===<!--gan-->Video games===
* {{frs user|Erin|lots}}
* {{frs user|Frank|2}}
";

    #[test]
    fn test_populate_headers_in_order() {
        let directory = Directory::from_wikitext(LIST);
        assert_eq!(
            directory.list_headers(),
            &[
                "<!--rfc:bio-->Biographies",
                "<!--rfc:all-->All RfCs",
                "Empty header",
                "<!--gan-->Video games",
            ]
        );
        assert!(directory.subscribers("Empty header").is_empty());
    }

    #[test]
    fn test_limits() {
        let directory = Directory::from_wikitext(LIST);
        let bios = directory.subscribers("<!--rfc:bio-->Biographies");
        assert_eq!(bios.len(), 3);
        assert_eq!(bios[0].limit, Some(5));
        assert_eq!(bios[1].limit, Some(DEFAULT_LIMIT));
        assert_eq!(bios[2].limit, None);
    }

    #[test]
    fn test_invalid_limit_skips_only_that_entry() {
        let mut directory = Directory::new();
        let report = directory.populate(LIST);
        let games = directory.subscribers("<!--gan-->Video games");
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].username, "Frank");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.subscribers, 5);
    }

    #[test]
    fn test_duplicate_user_in_header_kept_once() {
        let directory = Directory::from_wikitext("===Science===\n* {{frs user|Alice|2}}\n* {{frs user|Alice|9}}\n");
        let science = directory.subscribers("Science");
        assert_eq!(science.len(), 1);
        assert_eq!(science[0].limit, Some(2));
    }

    #[test]
    fn test_block_ends_at_any_heading() {
        let directory = Directory::from_wikitext(
            "===Science===\n* {{frs user|A|5}}\n\n==Inactive subscribers==\n* {{frs user|Gone|5}}\n",
        );
        let science: Vec<&str> = directory
            .subscribers("Science")
            .iter()
            .map(|s| s.username.as_str())
            .collect();
        assert_eq!(science, ["A"]);

        let directory = Directory::from_wikitext(
            "===History===\n* {{frs user|B}}\n====Notes====\n* {{frs user|C}}\n===Art===\n* {{frs user|D}}\n",
        );
        assert_eq!(directory.subscribers("History").len(), 1);
        assert_eq!(directory.subscribers("Art")[0].username, "D");
    }

    #[test]
    fn test_extra_parameters_skip_the_entry() {
        let mut directory = Directory::new();
        let report = directory.populate("===Science===\n* {{frs user|A|5|note}}\n* {{frs user|B|2}}\n");
        let science = directory.subscribers("Science");
        assert_eq!(science.len(), 1);
        assert_eq!(science[0].username, "B");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.subscribers, 1);
    }

    #[test]
    fn test_exceeds_limit() {
        let directory = Directory::from_wikitext(LIST);
        let bob = directory.subscribers("<!--rfc:bio-->Biographies")[1].clone();
        assert!(!directory.exceeds_limit(&bob));
        directory.mark_message_sent(&bob);
        assert!(directory.exceeds_limit(&bob));
        directory.mark_message_unsent(&bob);
        assert!(!directory.exceeds_limit(&bob));
    }

    #[test]
    fn test_unlimited_never_exceeds() {
        let directory = Directory::from_wikitext(LIST);
        let carol = directory.subscribers("<!--rfc:bio-->Biographies")[2].clone();
        for _ in 0..500 {
            directory.mark_message_sent(&carol);
        }
        assert!(!directory.exceeds_limit(&carol));
        assert_eq!(directory.count_for(&carol), 500);
    }

    #[test]
    fn test_counts_are_per_header() {
        let directory = Directory::from_wikitext(LIST);
        directory.mark_message_sent(&Subscriber::new("Alice", "<!--rfc:bio-->Biographies", Some(5)));
        assert_eq!(directory.get_count("<!--rfc:bio-->Biographies", "Alice"), 1);
        assert_eq!(directory.get_count("<!--rfc:all-->All RfCs", "Alice"), 0);
    }
}
