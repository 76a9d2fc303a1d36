use crate::requests::ga::{GaNomination, GaTopics};
use crate::requests::rfc::{RfC, RfcLedger};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// 第一組是 rfc 模板的所有參數，後面一路到簽名的 `(UTC)`
static RFC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{rfc\|(.*?)\}\}(?s:.)*?\(UTC\)").expect("valid rfc regex")
});

static GA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{\s*GA nominee\s*((?:\|[^}]*)?)\}\}").expect("valid GA nominee regex")
});

/// 具名參數；`[\w\s]` 讓 `{{=}}` 之類的不會被誤判
static NAMED_PARAM_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\s]*?=").expect("valid named param regex"));

const RFC_ID_PARAM: &str = "rfcid=";

/// 取出頁面上所有的 RfC。沒有 ID 的 RfC 也會回傳，呼叫端自行略過。
pub fn extract_rfcs(content: &str, title: &str, ledger: &RfcLedger, exclude_done: bool) -> Vec<RfC> {
    let mut rfcs = Vec::new();

    for tag in RFC_REGEX.captures_iter(content) {
        let mut id = String::new();
        let mut categories = HashSet::new();

        for param in tag[1].split('|').map(str::trim) {
            if let Some(rfc_id) = param.strip_prefix(RFC_ID_PARAM) {
                id = rfc_id.trim().to_string();
            } else if !param.is_empty() && !NAMED_PARAM_REGEX.is_match(param) {
                categories.insert(param.to_string());
            }
        }

        let feedback_done = !id.is_empty() && ledger.already_done(&id);
        if feedback_done && exclude_done {
            continue;
        }

        rfcs.push(RfC {
            id,
            categories,
            feedback_done,
            page: title.to_string(),
        });
    }

    rfcs
}

pub fn extract_ga_nomination(content: &str, title: &str, topics: &GaTopics) -> Option<GaNomination> {
    let caps = GA_REGEX.captures(content)?;
    let mut topic = String::new();
    let mut subtopic = String::new();

    for param in caps[1].split('|') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "topic" => topic = value.to_string(),
            "subtopic" => subtopic = value.to_string(),
            _ => {}
        }
    }

    if topic.is_empty() && subtopic.is_empty() {
        tracing::warn!("⚠️ GA nomination on {} has no topic or subtopic", title);
    }

    let mapped_topic = topics.topic_for(&subtopic).map(str::to_string);
    Some(GaNomination {
        topic,
        subtopic,
        mapped_topic,
        article: title.to_string(),
    })
}
