use crate::core::counter::current_month_tag;
use crate::core::directory::Directory;
use crate::core::messages::{DispatchOptions, DispatchReport, Message, MessageQueue};
use crate::core::runfile::{RunMark, Runfiles};
use crate::core::sampler::{SamplingPolicy, WeightedSampler};
use crate::domain::model::{CounterSnapshot, EditRequest, PageQuery, WikiPage};
use crate::domain::ports::{ConfigProvider, Requester, Storage, WikiApi};
use crate::requests::matchers::{extract_ga_nomination, extract_rfcs};
use crate::requests::{GaTopics, RfcLedger};
use crate::utils::error::Result;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use rand::Rng;

pub const RFC_TEMPLATE: &str = "Template:Rfc";
pub const GA_CATEGORY: &str = "Category:Good article nominees";

const LEDGER_SUMMARY: &str = "Updating list of completed RfCs";
const COUNTERS_SUMMARY: &str = "FRS run complete, updating sentcounts";

/// 一輪執行中共用的狀態
#[derive(Debug)]
pub struct RunState {
    pub directory: Directory,
    pub ledger: RfcLedger,
    pub topics: GaTopics,
    pub queue: MessageQueue,
    pub month: String,
    /// RfC 全部處理完且通知都交給寄送階段後才為 true；否則不寫回 ledger
    pub ledger_ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub rfcs_requested: usize,
    pub ga_nominations_requested: usize,
    pub messages_queued: usize,
    pub dispatch: DispatchReport,
    pub ledger_saved: bool,
    pub counters_saved: bool,
}

/// 一次完整的通知流程：載入 -> 處理 RfC 與 GA 提名 -> 寄送 -> 寫回狀態
pub struct NotificationRun<W: WikiApi, S: Storage, C: ConfigProvider> {
    wiki: W,
    runfiles: Runfiles<S>,
    config: C,
    sampler: WeightedSampler,
}

impl<W: WikiApi, S: Storage, C: ConfigProvider> NotificationRun<W, S, C> {
    pub fn new(wiki: W, storage: S, config: C) -> Self {
        let sampler = WeightedSampler::new(SamplingPolicy::new(config.catch_all_penalty()));
        Self {
            wiki,
            runfiles: Runfiles::new(storage),
            config,
            sampler,
        }
    }

    pub fn wiki(&self) -> &W {
        &self.wiki
    }

    pub async fn run(&self) -> Result<RunSummary> {
        tracing::info!("🚀 Starting FRS run");
        if self.config.dry_run() {
            tracing::info!("🔍 Dry run: no edits or runfiles will be written");
        }

        let mut state = self.load_state().await?;
        let mut summary = RunSummary::default();

        let processed = self.process(&mut state, &mut summary).await;
        summary.messages_queued = state.queue.message_count();

        // 處理失敗時不寄送，但計數仍要寫回
        let queue = std::mem::take(&mut state.queue);
        let dispatched = match processed {
            Ok(()) => {
                queue
                    .send_all(&self.wiki, &state.directory, &self.dispatch_options())
                    .await
            }
            Err(e) => {
                tracing::error!("❌ Processing failed, nothing will be sent: {}", e);
                queue.abandon(&state.directory);
                // 已排入的 RfC 通知也被丟棄了，下一輪要重新處理
                state.ledger_ready = false;
                Err(e)
            }
        };

        let persisted = self.persist(&state, &mut summary).await;
        summary.dispatch = dispatched?;
        persisted?;

        tracing::info!(
            "✅ FRS run complete: {} RfC(s), {} GA nomination(s), {} user(s) notified",
            summary.rfcs_requested,
            summary.ga_nominations_requested,
            summary.dispatch.delivered_users
        );
        Ok(summary)
    }

    /// 讀取訂閱清單、本月計數、已完成的 RfC 與 GA 主題；任一失敗都中止
    pub async fn load_state(&self) -> Result<RunState> {
        let month = current_month_tag();

        let subscriptions = self
            .wiki
            .fetch_wikitext(self.config.subscriptions_page_id())
            .await?;
        let directory = Directory::from_wikitext(&subscriptions);

        let counts = self
            .wiki
            .fetch_wikitext(self.config.sent_count_page_id())
            .await?;
        if counts.trim().is_empty() {
            tracing::info!("📄 Sent count page is empty, starting fresh");
        } else {
            directory.load_monthly_counters(CounterSnapshot::from_json(&counts)?, &month);
        }

        let done = self
            .wiki
            .fetch_wikitext(self.config.rfcs_done_page_id())
            .await?;
        let ledger = if done.trim().is_empty() {
            RfcLedger::new()
        } else {
            RfcLedger::from_json(&done)?
        };

        let guidelines = self
            .wiki
            .fetch_wikitext(self.config.ga_guidelines_page_id())
            .await?;
        let topics = GaTopics::from_wikitext(&guidelines);

        Ok(RunState {
            directory,
            ledger,
            topics,
            queue: MessageQueue::new(),
            month,
            ledger_ready: false,
        })
    }

    async fn process(&self, state: &mut RunState, summary: &mut RunSummary) -> Result<()> {
        summary.rfcs_requested = self.process_rfcs(state).await?;
        summary.ga_nominations_requested = self.process_ga_nominations(state).await?;
        Ok(())
    }

    /// 所有掛著 {{rfc}} 的頁面；有 ID 的 RfC 都記為已完成
    pub async fn process_rfcs(&self, state: &mut RunState) -> Result<usize> {
        let pages = self
            .wiki
            .query_pages(&PageQuery::EmbeddedIn {
                template: RFC_TEMPLATE.to_string(),
            })
            .await?;
        tracing::info!("🔎 Found {} pages with open RfCs", pages.len());

        let mut requested = 0;
        for page in &pages {
            let Some(content) = page.content.as_deref() else {
                tracing::warn!("⚠️ No content for {}, skipping it", page.title);
                continue;
            };

            let rfcs = extract_rfcs(content, &page.title, &state.ledger, false);
            for rfc in &rfcs {
                if rfc.id.is_empty() {
                    tracing::info!("RfC on {} has no ID yet, skipping it", page.title);
                } else if rfc.feedback_done {
                    tracing::debug!("Feedback already requested for RfC {} on {}", rfc.id, page.title);
                } else {
                    tracing::info!("📨 Requesting feedback for RfC {} on {}", rfc.id, page.title);
                    self.request_feedback(state, rfc);
                    requested += 1;
                }
            }
            state.ledger.mark_done(&rfcs);
        }

        state.ledger_ready = true;
        Ok(requested)
    }

    /// 上次記錄的位置之後加入分類的提名，完成後把最新一頁寫入 runfile
    pub async fn process_ga_nominations(&self, state: &mut RunState) -> Result<usize> {
        let mark = self.runfiles.load(GA_CATEGORY).await?;
        let now = Utc::now();

        let Some(since) = mark.timestamp.clone() else {
            tracing::info!("📄 New runfile for {}, starting from now", GA_CATEGORY);
            let start = RunMark::new(now.to_rfc3339_opts(SecondsFormat::Secs, true), None);
            self.save_mark(&start).await?;
            return Ok(0);
        };

        // 加入分類滿一小時後才發通知
        let settled = now - ChronoDuration::hours(1);
        let pages = self
            .wiki
            .query_pages(&PageQuery::CategoryMembers {
                category: GA_CATEGORY.to_string(),
                start: settled.to_rfc3339_opts(SecondsFormat::Secs, true),
                end: Some(since),
            })
            .await?;
        tracing::info!("🔎 Found {} new GA nominees", pages.len());

        let mut requested = 0;
        for page in &pages {
            if is_marked(page, &mark) {
                tracing::debug!("{} was handled by the previous run", page.title);
                continue;
            }
            let Some(content) = page.content.as_deref() else {
                tracing::warn!("⚠️ No content for {}, skipping it", page.title);
                continue;
            };
            match extract_ga_nomination(content, &page.title, &state.topics) {
                Some(nomination) => {
                    tracing::info!("📨 Requesting feedback for GA nomination {}", page.title);
                    self.request_feedback(state, &nomination);
                    requested += 1;
                }
                None => tracing::warn!("⚠️ No GA nominee template on {}", page.title),
            }
        }

        if let Some(newest) = pages.first() {
            if let Some(timestamp) = &newest.categorised_at {
                let next = RunMark::new(timestamp.clone(), Some(newest.page_id.to_string()));
                self.save_mark(&next).await?;
            }
        }

        Ok(requested)
    }

    /// 隨機決定這次要通知的人數，然後排入佇列
    pub fn request_feedback(&self, state: &mut RunState, item: &dyn Requester) -> usize {
        let (min, max) = self.config.message_range();
        let n = if max > min {
            rand::rng().random_range(min..max)
        } else {
            min
        };
        self.queue_feedback(state, item, n)
    }

    /// 回傳排入佇列的人數
    pub fn queue_feedback(&self, state: &mut RunState, item: &dyn Requester, n: usize) -> usize {
        let mut headers = Vec::new();
        let mut catch_all = None;
        for header in state.directory.list_headers() {
            let matched = item.include_header(header);
            if matched.include {
                headers.push(header.clone());
            }
            if matched.catch_all {
                catch_all = Some(header.clone());
            }
        }

        if headers.is_empty() {
            tracing::warn!(
                "⚠️ No headers matched {}, ignoring it for now but this could be a bug",
                item.page_title()
            );
            return 0;
        }

        let selected = self
            .sampler
            .sample(&state.directory, &headers, catch_all.as_deref(), n);
        tracing::debug!(
            "Selected {} of up to {} subscriber(s) for {}",
            selected.len(),
            n,
            item.page_title()
        );

        let count = selected.len();
        for subscriber in selected {
            state.queue.queue(
                Message {
                    subscriber,
                    request_type: item.request_type().to_string(),
                    title: item.page_title().to_string(),
                    rfc_id: item.rfc_id().map(str::to_string),
                },
                &state.directory,
            );
        }
        count
    }

    async fn persist(&self, state: &RunState, summary: &mut RunSummary) -> Result<()> {
        if self.config.dry_run() {
            tracing::info!("🔍 [dry run] Not saving the RfC ledger or sent counts");
            return Ok(());
        }

        if !state.ledger_ready {
            tracing::warn!("⚠️ RfC processing did not finish, leaving the completed RfC list untouched");
        } else if state.ledger.is_changed() {
            let request = EditRequest::replace_page(
                self.config.rfcs_done_page_id(),
                LEDGER_SUMMARY,
                state.ledger.to_json()?,
            );
            self.wiki.edit(&request).await?;
            summary.ledger_saved = true;
        }

        let snapshot = state.directory.serialize_counters(&state.month);
        let request = EditRequest::replace_page(
            self.config.sent_count_page_id(),
            COUNTERS_SUMMARY,
            snapshot.to_json()?,
        );
        self.wiki.edit(&request).await?;
        summary.counters_saved = true;
        tracing::info!("💾 Saved sent counts for {}", state.month);
        Ok(())
    }

    async fn save_mark(&self, mark: &RunMark) -> Result<()> {
        if self.config.dry_run() {
            tracing::info!("🔍 [dry run] Would write runfile mark {}", mark.serialize());
            return Ok(());
        }
        self.runfiles.save(GA_CATEGORY, mark).await
    }

    fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            edit_interval: self.config.edit_interval(),
            max_edits: self.config.max_edits_per_run(),
            dry_run: self.config.dry_run(),
        }
    }
}

/// 同一頁且加入分類的時間相同，代表上一輪已處理過
fn is_marked(page: &WikiPage, mark: &RunMark) -> bool {
    mark.page_id.as_deref() == Some(page.page_id.to_string().as_str())
        && page.categorised_at == mark.timestamp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalStorage;
    use crate::domain::model::EditTarget;
    use crate::requests::RfC;
    use crate::utils::error::BotError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const SUBSCRIPTIONS: &str = "\
===<!--rfc:bio-->Biographies===
{{frs user|Alice|5}}
{{frs user|Dave|0}}
===<!--rfc:all-->All RfCs===
{{frs user|Bob|0}}
===<!--gan-->Music===
{{frs user|Carol|0}}
";

    #[derive(Default)]
    struct MockWiki {
        pages: HashMap<String, String>,
        embedded: Vec<WikiPage>,
        category: Vec<WikiPage>,
        queries: Mutex<Vec<PageQuery>>,
        edits: Mutex<Vec<EditRequest>>,
        fail_talk_edits: Option<String>,
        fail_queries: Option<String>,
    }

    impl MockWiki {
        fn with_pages() -> Self {
            let mut pages = HashMap::new();
            pages.insert("1".to_string(), SUBSCRIPTIONS.to_string());
            pages.insert("2".to_string(), String::new());
            pages.insert("3".to_string(), "'''Arts'''<br>\n[[#Music|Music]]\n".to_string());
            pages.insert("4".to_string(), r#"{"rfcsdone":["OLD1"]}"#.to_string());
            Self {
                pages,
                ..Self::default()
            }
        }

        fn edits(&self) -> Vec<EditRequest> {
            self.edits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WikiApi for MockWiki {
        async fn fetch_wikitext(&self, page_id: &str) -> Result<String> {
            self.pages
                .get(page_id)
                .cloned()
                .ok_or_else(|| BotError::WikiApiError {
                    code: "nosuchpageid".to_string(),
                    info: page_id.to_string(),
                })
        }

        async fn query_pages(&self, query: &PageQuery) -> Result<Vec<WikiPage>> {
            self.queries.lock().unwrap().push(query.clone());
            if let Some(code) = &self.fail_queries {
                return Err(BotError::WikiApiError {
                    code: code.clone(),
                    info: "query failed".to_string(),
                });
            }
            Ok(match query {
                PageQuery::EmbeddedIn { .. } => self.embedded.clone(),
                PageQuery::CategoryMembers { .. } => self.category.clone(),
            })
        }

        async fn edit(&self, request: &EditRequest) -> Result<()> {
            if let (Some(code), EditTarget::Title(_)) = (&self.fail_talk_edits, &request.target) {
                return Err(BotError::WikiApiError {
                    code: code.clone(),
                    info: "refused".to_string(),
                });
            }
            self.edits.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct TestConfig {
        dry_run: bool,
    }

    impl ConfigProvider for TestConfig {
        fn subscriptions_page_id(&self) -> &str {
            "1"
        }
        fn sent_count_page_id(&self) -> &str {
            "2"
        }
        fn ga_guidelines_page_id(&self) -> &str {
            "3"
        }
        fn rfcs_done_page_id(&self) -> &str {
            "4"
        }
        fn message_range(&self) -> (usize, usize) {
            (5, 6)
        }
        fn edit_interval(&self) -> Duration {
            Duration::ZERO
        }
        fn max_edits_per_run(&self) -> Option<usize> {
            None
        }
        fn catch_all_penalty(&self) -> f64 {
            2.0
        }
        fn dry_run(&self) -> bool {
            self.dry_run
        }
    }

    fn rfc_page() -> WikiPage {
        WikiPage {
            page_id: 10,
            title: "Talk:Someone".to_string(),
            content: Some(
                "{{rfc|bio|rfcid=NEW1}} Question? 12:00, 1 May 2020 (UTC)\n\
                 {{rfc|bio|rfcid=OLD1}} Old one. 12:00, 1 April 2020 (UTC)\n\
                 {{rfc|bio}} Unlisted. 12:00, 2 May 2020 (UTC)"
                    .to_string(),
            ),
            categorised_at: None,
        }
    }

    fn run_with(wiki: MockWiki, dir: &TempDir, dry_run: bool) -> NotificationRun<MockWiki, LocalStorage, TestConfig> {
        let storage = LocalStorage::new(dir.path().to_str().unwrap().to_string());
        NotificationRun::new(wiki, storage, TestConfig { dry_run })
    }

    #[tokio::test]
    async fn test_queue_feedback_uses_matching_headers() {
        let dir = TempDir::new().unwrap();
        let run = run_with(MockWiki::with_pages(), &dir, false);
        let mut state = run.load_state().await.unwrap();

        let rfc = RfC {
            id: "X1".to_string(),
            categories: ["bio".to_string()].into_iter().collect(),
            feedback_done: false,
            page: "Talk:Someone".to_string(),
        };
        let queued = run.queue_feedback(&mut state, &rfc, 10);

        // Alice、Dave（bio）加上 Bob（all），Carol 是 GA 的
        assert_eq!(queued, 3);
        assert_eq!(state.queue.user_count(), 3);
        assert!(state.queue.messages_for("Carol").is_empty());
        assert_eq!(state.directory.get_count("<!--rfc:bio-->Biographies", "Alice"), 1);
        assert_eq!(
            state.queue.messages_for("Bob")[0].rfc_id.as_deref(),
            Some("X1")
        );
    }

    #[tokio::test]
    async fn test_queue_feedback_without_headers() {
        let dir = TempDir::new().unwrap();
        let run = run_with(MockWiki::with_pages(), &dir, false);
        let mut state = run.load_state().await.unwrap();

        let nomination = extract_ga_nomination(
            "{{GA nominee|12:00|subtopic=Chemistry}}",
            "Talk:Benzene",
            &state.topics,
        )
        .unwrap();
        assert_eq!(run.queue_feedback(&mut state, &nomination, 5), 0);
        assert!(state.queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_run_notifies_and_persists() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("category-good-article-nominees.frsrunfile"),
            "2020-05-01T00:00:00Z;77",
        )
        .unwrap();

        let mut wiki = MockWiki::with_pages();
        wiki.embedded = vec![rfc_page()];
        wiki.category = vec![
            WikiPage {
                page_id: 78,
                title: "Talk:Some Album".to_string(),
                content: Some("{{GA nominee|12:00|nominator=X|subtopic=Music}}".to_string()),
                categorised_at: Some("2020-05-02T00:00:00Z".to_string()),
            },
            WikiPage {
                page_id: 77,
                title: "Talk:Old Album".to_string(),
                content: Some("{{GA nominee|12:00|nominator=X|subtopic=Music}}".to_string()),
                categorised_at: Some("2020-05-01T00:00:00Z".to_string()),
            },
        ];

        let run = run_with(wiki, &dir, false);
        let summary = run.run().await.unwrap();

        assert_eq!(summary.rfcs_requested, 1);
        assert_eq!(summary.ga_nominations_requested, 1);
        assert_eq!(summary.dispatch.delivered_users, 4);
        assert!(summary.ledger_saved);
        assert!(summary.counters_saved);

        let edits = run.wiki().edits();
        let talk_edits: Vec<_> = edits
            .iter()
            .filter(|e| matches!(&e.target, EditTarget::Title(_)))
            .collect();
        assert_eq!(talk_edits.len(), 4);

        let ledger = edits
            .iter()
            .find(|e| e.target == EditTarget::PageId("4".to_string()))
            .unwrap();
        assert_eq!(ledger.text, r#"{"rfcsdone":["NEW1","OLD1"]}"#);

        let counts = edits
            .iter()
            .find(|e| e.target == EditTarget::PageId("2".to_string()))
            .unwrap();
        let snapshot = CounterSnapshot::from_json(&counts.text).unwrap();
        assert_eq!(snapshot.month, current_month_tag());
        assert_eq!(snapshot.headers["<!--gan-->Music"]["Carol"], 1);
        assert_eq!(snapshot.headers["<!--rfc:bio-->Biographies"]["Alice"], 1);

        let runfile =
            std::fs::read_to_string(dir.path().join("category-good-article-nominees.frsrunfile")).unwrap();
        assert_eq!(runfile, "2020-05-02T00:00:00Z;78");

        let queries = run.wiki().queries.lock().unwrap().clone();
        match &queries[1] {
            PageQuery::CategoryMembers { end, .. } => {
                assert_eq!(end.as_deref(), Some("2020-05-01T00:00:00Z"))
            }
            other => panic!("unexpected query {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_runfile_skips_category_query() {
        let dir = TempDir::new().unwrap();
        let run = run_with(MockWiki::with_pages(), &dir, false);
        let summary = run.run().await.unwrap();

        assert_eq!(summary.ga_nominations_requested, 0);
        assert_eq!(run.wiki().queries.lock().unwrap().len(), 1);
        let runfile =
            std::fs::read_to_string(dir.path().join("category-good-article-nominees.frsrunfile")).unwrap();
        assert!(runfile.ends_with(';'));
        assert!(RunMark::parse(GA_CATEGORY, &runfile).unwrap().timestamp.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut wiki = MockWiki::with_pages();
        wiki.embedded = vec![rfc_page()];

        let run = run_with(wiki, &dir, true);
        let summary = run.run().await.unwrap();

        assert_eq!(summary.rfcs_requested, 1);
        assert_eq!(summary.dispatch.delivered_users, 3);
        assert!(!summary.counters_saved);
        assert!(run.wiki().edits().is_empty());
        let runfile = std::fs::read_to_string(dir.path().join("category-good-article-nominees.frsrunfile"))
            .unwrap_or_default();
        assert!(runfile.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_bot_still_saves_counts() {
        let dir = TempDir::new().unwrap();
        let mut wiki = MockWiki::with_pages();
        wiki.embedded = vec![rfc_page()];
        wiki.fail_talk_edits = Some("blocked".to_string());

        let run = run_with(wiki, &dir, false);
        let result = run.run().await;
        assert!(matches!(result, Err(BotError::BotBlockedError { .. })));

        let edits = run.wiki().edits();
        let counts = edits
            .iter()
            .find(|e| e.target == EditTarget::PageId("2".to_string()))
            .unwrap();
        let snapshot = CounterSnapshot::from_json(&counts.text).unwrap();
        for username in ["Alice", "Bob", "Dave"] {
            let count = snapshot
                .headers
                .values()
                .filter_map(|users| users.get(username))
                .sum::<u32>();
            assert_eq!(count, 0, "{} should not be counted", username);
        }
    }

    #[tokio::test]
    async fn test_failed_rfc_query_keeps_ledger() {
        let dir = TempDir::new().unwrap();
        let mut wiki = MockWiki::with_pages();
        wiki.fail_queries = Some("internal_api_error".to_string());

        let run = run_with(wiki, &dir, false);
        let result = run.run().await;
        assert!(matches!(result, Err(BotError::WikiApiError { .. })));

        // OLD1 不能被空的 ledger 蓋掉，計數仍要寫回
        let edits = run.wiki().edits();
        assert!(edits.iter().all(|e| e.target != EditTarget::PageId("4".to_string())));
        assert!(edits.iter().any(|e| e.target == EditTarget::PageId("2".to_string())));
    }
}
