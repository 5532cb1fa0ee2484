use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use super::{MailStore, MessagePage, MessageSummary, StoreError, MAX_PAGE_SIZE};
use crate::auth::Authenticator;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const MAX_RATE_LIMIT_RETRIES: usize = 5;

/// Gmail REST client for the scan/delete workflow. Rate-limit (429) retries
/// happen here at the transport layer; everything else propagates to the
/// caller unretried.
pub struct GmailStore {
    client: Client,
    auth: Authenticator,
    api_base: String,
}

impl GmailStore {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            client: Client::new(),
            auth,
            api_base: GMAIL_API_BASE.to_string(),
        }
    }

    /// Point the client at a non-default API base URL. Used by tests.
    pub fn with_api_base(auth: Authenticator, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            auth,
            api_base: api_base.into(),
        }
    }

    async fn get_with_retry(&self, url: &str) -> Result<String, StoreError> {
        let mut backoff_seconds = 1u64;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let token = self.auth.access_token().await?;
            let response = self
                .client
                .get(url)
                .bearer_auth(&token)
                .header("accept", "application/json")
                .send()
                .await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_RATE_LIMIT_RETRIES
            {
                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                debug!("gmail api throttled, retrying in {retry_after_seconds}s: {url}");
                sleep(Duration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                continue;
            }

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(StoreError::Api { status, body });
            }
            return Ok(body);
        }

        Err(StoreError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "gmail api request exhausted rate-limit retries".to_string(),
        })
    }
}

#[async_trait::async_trait(?Send)]
impl MailStore for GmailStore {
    async fn list_page(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, StoreError> {
        let max_results = page_size.clamp(1, MAX_PAGE_SIZE);
        let mut url = format!(
            "{}/users/me/messages?maxResults={max_results}",
            self.api_base
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={token}"));
        }

        let body = self.get_with_retry(&url).await?;
        let list: MessageListResponse = serde_json::from_str(&body)?;

        Ok(MessagePage {
            ids: list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|stub| stub.id)
                .collect(),
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    async fn fetch_summary(&self, id: &str) -> Result<MessageSummary, StoreError> {
        // metadata format with named headers keeps the response to exactly
        // the fields the filter needs.
        let url = format!(
            "{}/users/me/messages/{id}?format=metadata\
             &metadataHeaders=From&metadataHeaders=Subject&metadataHeaders=Date",
            self.api_base
        );

        let body = match self.get_with_retry(&url).await {
            Err(StoreError::Api { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Err(StoreError::NotFound { id: id.to_string() });
            }
            other => other?,
        };
        let message: MessageResponse = serde_json::from_str(&body)?;

        Ok(summarize(id, &message))
    }

    async fn batch_delete(&self, ids: &[String]) -> Result<(), StoreError> {
        let url = format!("{}/users/me/messages/batchDelete", self.api_base);
        let token = self.auth.access_token().await?;
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&BatchDeleteRequest { ids })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StoreError::Api { status, body });
        }
        Ok(())
    }
}

/// Pick out From/Subject/Date, case-insensitively, first occurrence wins.
/// The early break once all three are present is an optimization only.
fn summarize(id: &str, message: &MessageResponse) -> MessageSummary {
    let mut from = None;
    let mut subject = None;
    let mut date = None;

    for header in message.payload.headers.as_deref().unwrap_or_default() {
        match header.name.to_ascii_lowercase().as_str() {
            "from" if from.is_none() => from = Some(header.value.clone()),
            "subject" if subject.is_none() => subject = Some(header.value.clone()),
            "date" if date.is_none() => date = Some(header.value.clone()),
            _ => {}
        }
        if from.is_some() && subject.is_some() && date.is_some() {
            break;
        }
    }

    MessageSummary {
        id: id.to_string(),
        from: from.unwrap_or_default(),
        subject: subject.unwrap_or_default(),
        date_raw: date.unwrap_or_default(),
    }
}

// --- Gmail API wire types ---

#[derive(Debug, Clone, Deserialize)]
struct MessageListResponse {
    messages: Option<Vec<MessageStub>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    payload: MessagePayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MessagePayload {
    headers: Option<Vec<MessageHeader>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct BatchDeleteRequest<'a> {
    ids: &'a [String],
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::{summarize, GmailStore, MessageListResponse, MessageResponse};
    use crate::auth::{Authenticator, ClientCredentials};
    use crate::store::{MailStore, MessageSummary};

    /// Authenticator backed by a token file that is valid for the whole test.
    fn live_authenticator(dir: &std::path::Path) -> Authenticator {
        let token = serde_json::json!({
            "access_token": "tok-test",
            "refresh_token": "refresh",
            "expires_at": chrono::Utc::now() + chrono::Duration::hours(1),
        });
        let path = dir.join("token.json");
        std::fs::write(&path, token.to_string()).unwrap();
        Authenticator::new(
            ClientCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            path,
        )
    }

    #[tokio::test]
    async fn list_page_clamps_page_size_to_the_gmail_maximum() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_server = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            for _ in 0..2 {
                let request = server.recv().unwrap();
                seen_in_server.lock().unwrap().push(request.url().to_string());
                let _ = request.respond(tiny_http::Response::from_string(
                    r#"{"messages": [{"id": "m1", "threadId": "t1"}]}"#,
                ));
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let store = GmailStore::with_api_base(
            live_authenticator(dir.path()),
            format!("http://127.0.0.1:{port}"),
        );

        let first = store.list_page(9999, None).await.unwrap();
        assert_eq!(first.ids, vec!["m1"]);
        let _ = store.list_page(0, Some("tok-2")).await.unwrap();
        handle.join().unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen[0].contains("maxResults=500"), "got {}", seen[0]);
        assert!(!seen[0].contains("pageToken"));
        assert!(seen[1].contains("maxResults=1"), "got {}", seen[1]);
        assert!(seen[1].contains("pageToken=tok-2"));
    }

    #[test]
    fn list_response_decodes_ids_and_token() {
        let body = r#"{
            "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
            "nextPageToken": "tok-2",
            "resultSizeEstimate": 2
        }"#;
        let list: MessageListResponse = serde_json::from_str(body).unwrap();
        let ids: Vec<String> = list.messages.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(list.next_page_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn list_response_tolerates_missing_messages() {
        let list: MessageListResponse = serde_json::from_str("{}").unwrap();
        assert!(list.messages.is_none());
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn summarize_matches_headers_case_insensitively_first_wins() {
        let body = r#"{
            "payload": {
                "headers": [
                    {"name": "FROM", "value": "a@example.com"},
                    {"name": "from", "value": "shadowed@example.com"},
                    {"name": "Subject", "value": "hello"},
                    {"name": "date", "value": "Mon, 2 Jan 2023 10:00:00 +0000"}
                ]
            }
        }"#;
        let message: MessageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            summarize("m1", &message),
            MessageSummary {
                id: "m1".to_string(),
                from: "a@example.com".to_string(),
                subject: "hello".to_string(),
                date_raw: "Mon, 2 Jan 2023 10:00:00 +0000".to_string(),
            }
        );
    }

    #[test]
    fn summarize_leaves_missing_headers_empty() {
        let body = r#"{"payload": {"headers": [{"name": "Subject", "value": "only"}]}}"#;
        let message: MessageResponse = serde_json::from_str(body).unwrap();
        let summary = summarize("m2", &message);
        assert_eq!(summary.from, "");
        assert_eq!(summary.subject, "only");
        assert_eq!(summary.date_raw, "");
    }
}
