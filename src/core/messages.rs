use crate::core::directory::Directory;
use crate::domain::model::{EditRequest, Subscriber};
use crate::domain::ports::WikiApi;
use crate::utils::error::{BotError, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

/// header 裡的 HTML 註解（例如 `<!--rfc:bio-->`）不應該出現在通知裡
static COMMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*?<!--.*?-->\s*?").expect("valid comment regex"));

const NOTIFICATION_TEMPLATE: &str = "FRS notification";
const MULTI_SECTION_TITLE: &str = "Feedback requests from the Feedback Request Service";

/// 這些錯誤碼代表機器人被封鎖或失去寫入權限
const BLOCKED_CODES: [&str; 3] = ["noedit", "writeapidenied", "blocked"];

/// 一則準備寄給某筆訂閱的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subscriber: Subscriber,
    pub request_type: String,
    /// 被討論的頁面，不是訊息標題
    pub title: String,
    pub rfc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    pub edit_interval: Duration,
    pub max_edits: Option<usize>,
    pub dry_run: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            edit_interval: Duration::from_secs(5),
            max_edits: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered_users: usize,
    pub delivered_messages: usize,
    pub failed_users: usize,
    pub skipped_users: usize,
}

/// 依使用者分組的待寄訊息
#[derive(Debug, Default)]
pub struct MessageQueue {
    queued: BTreeMap<String, Vec<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入佇列的同時就計入寄送次數，寄送失敗時再扣回
    pub fn queue(&mut self, message: Message, directory: &Directory) {
        directory.mark_message_sent(&message.subscriber);
        self.queued
            .entry(message.subscriber.username.clone())
            .or_default()
            .push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn user_count(&self) -> usize {
        self.queued.len()
    }

    pub fn message_count(&self) -> usize {
        self.queued.values().map(Vec::len).sum()
    }

    pub fn messages_for(&self, username: &str) -> &[Message] {
        self.queued
            .get(username)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// 放棄尚未寄出的訊息，把計數扣回
    pub fn abandon(self, directory: &Directory) -> usize {
        let count = self.message_count();
        for messages in self.queued.values() {
            unmark_all(directory, messages);
        }
        if count > 0 {
            tracing::warn!("⚠️ Abandoned {} queued message(s)", count);
        }
        count
    }

    /// 每位使用者一個新段落
    pub async fn send_all<W: WikiApi + ?Sized>(
        self,
        wiki: &W,
        directory: &Directory,
        options: &DispatchOptions,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let mut edits = 0usize;

        let mut users = self.queued.into_iter();

        while let Some((username, messages)) = users.next() {
            if options.max_edits.is_some_and(|max| edits >= max) {
                tracing::warn!("⚠️ Edit limit reached, not notifying {}", username);
                unmark_all(directory, &messages);
                report.skipped_users += 1;
                continue;
            }

            let request = EditRequest::new_section(
                format!("User talk:{}", username),
                section_title(&messages),
                edit_summary(&messages, directory),
                notification_text(&messages),
            );

            if options.dry_run {
                tracing::info!(
                    "🔍 [dry run] Would notify {} about {} item(s): {}",
                    username,
                    messages.len(),
                    request.summary
                );
                report.delivered_users += 1;
                report.delivered_messages += messages.len();
                continue;
            }

            edits += 1;
            match wiki.edit(&request).await {
                Ok(()) => {
                    tracing::info!(
                        "✅ Invited {} to give feedback on {} requesting item(s)",
                        username,
                        messages.len()
                    );
                    report.delivered_users += 1;
                    report.delivered_messages += messages.len();
                    if !options.edit_interval.is_zero() {
                        tokio::time::sleep(options.edit_interval).await;
                    }
                }
                Err(BotError::WikiApiError { code, info }) => {
                    unmark_all(directory, &messages);
                    if BLOCKED_CODES.contains(&code.as_str()) {
                        tracing::error!("❌ Edit refused with '{}', the bot may be blocked", code);
                        unmark_rest(directory, users);
                        return Err(BotError::BotBlockedError { code });
                    }
                    if code == "pagedeleted" {
                        tracing::warn!(
                            "⚠️ Talk page for {} was deleted while we were editing it",
                            username
                        );
                    } else {
                        tracing::warn!(
                            "⚠️ Could not notify {} ({}: {}), skipping them",
                            username,
                            code,
                            info
                        );
                    }
                    report.failed_users += 1;
                }
                Err(e) => {
                    unmark_all(directory, &messages);
                    tracing::error!("❌ Non-API error while notifying {}: {}", username, e);
                    unmark_rest(directory, users);
                    return Err(e);
                }
            }
        }

        Ok(report)
    }
}

fn unmark_all(directory: &Directory, messages: &[Message]) {
    for message in messages {
        directory.mark_message_unsent(&message.subscriber);
    }
}

/// 中止時還沒輪到的使用者
fn unmark_rest(directory: &Directory, rest: impl Iterator<Item = (String, Vec<Message>)>) {
    for (_, messages) in rest {
        unmark_all(directory, &messages);
    }
}

pub fn clean_header(header: &str) -> String {
    COMMENT_REGEX.replace_all(header, "").trim().to_string()
}

/// `{{subst:FRS notification|title0=...|header0=...|type0=...|rfcid0=...}} ~~~~`
pub fn notification_text(messages: &[Message]) -> String {
    let mut text = format!("{{{{subst:{}", NOTIFICATION_TEMPLATE);
    for (index, message) in messages.iter().enumerate() {
        push_param(&mut text, "title", index, &message.title);
        push_param(&mut text, "header", index, &clean_header(&message.subscriber.header));
        push_param(&mut text, "type", index, &message.request_type);
        if let Some(rfc_id) = &message.rfc_id {
            push_param(&mut text, "rfcid", index, rfc_id);
        }
    }
    text.push_str("}} ~~~~");
    text
}

fn push_param(text: &mut String, name: &str, index: usize, value: &str) {
    text.push('|');
    text.push_str(name);
    text.push_str(&index.to_string());
    text.push('=');
    text.push_str(value);
}

pub fn section_title(messages: &[Message]) -> String {
    match messages {
        [single] => format!(
            "Feedback request: {} {}",
            clean_header(&single.subscriber.header),
            single.request_type
        ),
        _ => MULTI_SECTION_TITLE.to_string(),
    }
}

/// 每個 header 只列一次；有上限的訂閱附上本月用量
pub fn edit_summary(messages: &[Message], directory: &Directory) -> String {
    let mut headers: Vec<(String, usize, &Message)> = Vec::new();
    for message in messages {
        let cleaned = clean_header(&message.subscriber.header);
        match headers.iter_mut().find(|(header, _, _)| *header == cleaned) {
            Some((_, count, _)) => *count += 1,
            None => headers.push((cleaned, 1, message)),
        }
    }

    let parts: Vec<String> = headers
        .iter()
        .map(|(header, count, message)| {
            let (determiner, request_type) = if *count > 1 {
                ("some", pluralize(&message.request_type))
            } else {
                ("a", message.request_type.clone())
            };
            let limit = match message.subscriber.limit {
                Some(limit) => format!(
                    " ({}/{} this month)",
                    directory.count_for(&message.subscriber),
                    limit
                ),
                None => String::new(),
            };
            format!("{} \"{}\" {}{}", determiner, header, request_type, limit)
        })
        .collect();

    format!(
        "[[WP:FRS|Feedback Request Service]] notification on {}. You can unsubscribe at [[WP:FRS]].",
        join_list(&parts)
    )
}

fn join_list(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

/// 片語的中心詞在 "for"/"of" 之前，例如 "request for comment"
///
/// 只處理固定的請求類型（"request for comment"、"Good Article nomination"），不是通用的英文複數規則。
pub fn pluralize(phrase: &str) -> String {
    let words: Vec<&str> = phrase.split(' ').collect();
    let Some(last) = words.len().checked_sub(1) else {
        return String::new();
    };
    let head = words
        .iter()
        .position(|word| matches!(*word, "for" | "of"))
        .filter(|&index| index > 0)
        .map(|index| index - 1)
        .unwrap_or(last);

    words
        .iter()
        .enumerate()
        .map(|(index, word)| {
            if index == head {
                pluralize_word(word)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pluralize_word(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_ascii_lowercase();
    if ["s", "x", "z", "ch", "sh"].iter().any(|end| lower.ends_with(end)) {
        return format!("{}es", word);
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", word)
}
