use crate::domain::model::HeaderMatch;
use crate::domain::ports::Requester;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// GA 的 header 前綴，比對前去掉
pub const GA_PREFIX: &str = "<!--gan-->";

pub const GA_REQUEST_TYPE: &str = "Good Article nomination";

/// `'''Topic'''<br>` 後面接著一串 `[[link|Subtopic]]`
static TOPIC_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'''(.*?)'''\s*?<br>\s*?\n((?:\[\[[^|]*\|(?:[^|]*)\]\](?:\{\{·\}\})?\n?)+)")
        .expect("valid GA topic regex")
});

static SUBTOPIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[[^|]*\|([^|]*)\]\]").expect("valid GA subtopic regex"));

/// subtopic -> topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaTopics {
    topics: HashMap<String, String>,
}

impl Default for GaTopics {
    fn default() -> Self {
        let mut topics = HashMap::new();
        topics.insert("Miscellaneous".to_string(), "Miscellaneous".to_string());
        Self { topics }
    }
}

impl GaTopics {
    pub fn from_wikitext(text: &str) -> Self {
        let mut topics = Self::default();
        for block in TOPIC_BLOCK_REGEX.captures_iter(text) {
            let topic = &block[1];
            for subtopic in SUBTOPIC_REGEX.captures_iter(&block[2]) {
                topics
                    .topics
                    .insert(subtopic[1].to_string(), topic.to_string());
            }
        }
        tracing::debug!("Loaded {} GA subtopics", topics.topics.len());
        topics
    }

    pub fn topic_for(&self, subtopic: &str) -> Option<&str> {
        self.topics.get(subtopic).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// 一篇 GA 提名，只會有一個主題
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaNomination {
    pub topic: String,
    pub subtopic: String,
    /// subtopic 對應的 topic（例如 "Music" 的 header 其實叫 "Other music articles"）
    pub mapped_topic: Option<String>,
    pub article: String,
}

impl Requester for GaNomination {
    fn include_header(&self, header: &str) -> HeaderMatch {
        let header = header.strip_prefix(GA_PREFIX).unwrap_or(header);
        let matches = (!self.topic.is_empty() && header == self.topic)
            || (!self.subtopic.is_empty() && header == self.subtopic)
            || self.mapped_topic.as_deref() == Some(header);
        if matches {
            HeaderMatch::included()
        } else {
            HeaderMatch::NONE
        }
    }

    fn page_title(&self) -> &str {
        &self.article
    }

    fn request_type(&self) -> &str {
        GA_REQUEST_TYPE
    }
}
