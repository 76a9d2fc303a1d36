use crate::domain::model::{EditRequest, EditTarget, PageQuery, WikiPage};
use crate::domain::ports::WikiApi;
use crate::utils::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

type Params = Vec<(String, String)>;

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// MediaWiki Action API 客戶端（formatversion=2，cookie 保存登入狀態）
pub struct MediaWikiClient {
    client: Client,
    api_url: String,
    csrf_token: Mutex<Option<String>>,
}

impl MediaWikiClient {
    pub fn new(api_url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            csrf_token: Mutex::new(None),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// 以 bot password 登入
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let response = self
            .get(params(&[("action", "query"), ("meta", "tokens"), ("type", "login")]))
            .await?;
        let token = response
            .pointer("/query/tokens/logintoken")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::MissingDataError {
                message: "login token missing from API response".to_string(),
            })?
            .to_string();

        let response = self
            .post(params(&[
                ("action", "login"),
                ("lgname", username),
                ("lgpassword", password),
                ("lgtoken", token.as_str()),
            ]))
            .await?;

        match response.pointer("/login/result").and_then(Value::as_str) {
            Some("Success") => {
                tracing::info!("🔑 Logged in as {}", username);
                Ok(())
            }
            result => Err(BotError::WikiApiError {
                code: "login-failed".to_string(),
                info: response
                    .pointer("/login/reason")
                    .and_then(Value::as_str)
                    .or(result)
                    .unwrap_or("no result from login")
                    .to_string(),
            }),
        }
    }

    async fn get(&self, mut query: Params) -> Result<Value> {
        push_format(&mut query);
        tracing::debug!("GET {} {:?}", self.api_url, query);
        let response = self
            .client
            .get(&self.api_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        check_api_error(&body)?;
        Ok(body)
    }

    async fn post(&self, mut form: Params) -> Result<Value> {
        push_format(&mut form);
        let response = self
            .client
            .post(&self.api_url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        check_api_error(&body)?;
        Ok(body)
    }

    async fn csrf_token(&self) -> Result<String> {
        let mut cached = self.csrf_token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let response = self
            .get(params(&[("action", "query"), ("meta", "tokens"), ("type", "csrf")]))
            .await?;
        let token = response
            .pointer("/query/tokens/csrftoken")
            .and_then(Value::as_str)
            .ok_or_else(|| BotError::MissingDataError {
                message: "csrf token missing from API response".to_string(),
            })?
            .to_string();
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn try_edit(&self, request: &EditRequest) -> Result<()> {
        let token = self.csrf_token().await?;
        let mut form = params(&[
            ("action", "edit"),
            ("summary", request.summary.as_str()),
            ("text", request.text.as_str()),
            ("bot", "true"),
            ("token", token.as_str()),
        ]);
        match &request.target {
            EditTarget::PageId(id) => form.push(("pageid".to_string(), id.clone())),
            EditTarget::Title(title) => form.push(("title".to_string(), title.clone())),
        }
        if let Some(section_title) = &request.section_title {
            form.push(("section".to_string(), "new".to_string()));
            form.push(("sectiontitle".to_string(), section_title.clone()));
        }
        let minor = if request.minor { "minor" } else { "notminor" };
        form.push((minor.to_string(), "true".to_string()));
        if request.follow_redirects {
            form.push(("redirect".to_string(), "true".to_string()));
        }

        let response = self.post(form).await?;
        match response.pointer("/edit/result").and_then(Value::as_str) {
            Some("Success") => {
                if response.pointer("/edit/nochange").is_some() {
                    tracing::debug!("Edit succeeded but did not change the page");
                }
                Ok(())
            }
            other => Err(BotError::WikiApiError {
                code: "edit-failed".to_string(),
                info: format!("unexpected edit result {:?}", other),
            }),
        }
    }
}

fn push_format(query: &mut Params) {
    query.push(("format".to_string(), "json".to_string()));
    query.push(("formatversion".to_string(), "2".to_string()));
}

/// API 回傳 `error` 物件時轉成錯誤
pub fn check_api_error(body: &Value) -> Result<()> {
    match body.get("error") {
        Some(error) => Err(BotError::WikiApiError {
            code: error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            info: error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Ok(()),
    }
}

fn query_params(query: &PageQuery) -> Params {
    match query {
        PageQuery::EmbeddedIn { template } => params(&[
            ("action", "query"),
            ("prop", "revisions"),
            ("generator", "embeddedin"),
            ("geititle", template.as_str()),
            ("geilimit", "max"),
            ("rvprop", "content"),
            ("rvslots", "main"),
        ]),
        PageQuery::CategoryMembers {
            category,
            start,
            end,
        } => {
            let mut query = params(&[
                ("action", "query"),
                ("prop", "revisions|categories"),
                ("generator", "categorymembers"),
                ("gcmtitle", category.as_str()),
                ("gcmsort", "timestamp"),
                ("gcmdir", "descending"),
                ("gcmstart", start.as_str()),
                ("gcmlimit", "max"),
                ("rvprop", "content"),
                ("rvslots", "main"),
                ("clprop", "timestamp"),
                ("clcategories", category.as_str()),
            ]);
            if let Some(end) = end {
                query.push(("gcmend".to_string(), end.clone()));
            }
            query
        }
    }
}

/// 解析 `query.pages`；同一頁可能分散在多個 continue 批次裡
fn merge_pages(body: &Value, pages: &mut Vec<WikiPage>, index: &mut HashMap<u64, usize>) {
    let Some(items) = body.pointer("/query/pages").and_then(Value::as_array) else {
        return;
    };

    for item in items {
        if item.get("missing").is_some() {
            continue;
        }
        let Some(page_id) = item.get("pageid").and_then(Value::as_u64) else {
            tracing::warn!("⚠️ Page without pageid in query response, skipping");
            continue;
        };
        let content = item
            .pointer("/revisions/0/slots/main/content")
            .and_then(Value::as_str)
            .map(str::to_string);
        let categorised_at = item
            .pointer("/categories/0/timestamp")
            .and_then(Value::as_str)
            .map(str::to_string);

        match index.get(&page_id) {
            Some(&position) => {
                let page = &mut pages[position];
                if page.content.is_none() {
                    page.content = content;
                }
                if page.categorised_at.is_none() {
                    page.categorised_at = categorised_at;
                }
            }
            None => {
                index.insert(page_id, pages.len());
                pages.push(WikiPage {
                    page_id,
                    title: item
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    content,
                    categorised_at,
                });
            }
        }
    }
}

#[async_trait]
impl WikiApi for MediaWikiClient {
    async fn fetch_wikitext(&self, page_id: &str) -> Result<String> {
        let response = self
            .get(params(&[
                ("action", "parse"),
                ("pageid", page_id),
                ("prop", "wikitext"),
            ]))
            .await?;
        response
            .pointer("/parse/wikitext")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BotError::MissingDataError {
                message: format!("no wikitext returned for page ID {}", page_id),
            })
    }

    async fn query_pages(&self, query: &PageQuery) -> Result<Vec<WikiPage>> {
        let base = query_params(query);
        let mut continuation: Params = Vec::new();
        let mut pages = Vec::new();
        let mut index = HashMap::new();

        loop {
            let mut request = base.clone();
            request.extend(continuation.iter().cloned());
            let body = self.get(request).await?;
            merge_pages(&body, &mut pages, &mut index);

            match body.get("continue").and_then(Value::as_object) {
                Some(next) => {
                    continuation = next
                        .iter()
                        .map(|(k, v)| {
                            let value = match v {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            (k.clone(), value)
                        })
                        .collect();
                }
                None => break,
            }
        }

        if matches!(query, PageQuery::CategoryMembers { .. }) {
            // 與 gcmdir=descending 一致：最新加入分類的在前
            pages.sort_by(|a, b| b.categorised_at.cmp(&a.categorised_at));
        }

        tracing::debug!("Query returned {} pages", pages.len());
        Ok(pages)
    }

    async fn edit(&self, request: &EditRequest) -> Result<()> {
        match self.try_edit(request).await {
            Err(BotError::WikiApiError { code, .. }) if code == "badtoken" => {
                tracing::debug!("CSRF token expired, fetching a new one");
                *self.csrf_token.lock().await = None;
                self.try_edit(request).await
            }
            result => result,
        }
    }
}
