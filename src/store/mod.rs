use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::AuthError;

pub mod gmail;

pub use gmail::GmailStore;

/// Gmail caps messages.list at 500 results per page.
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gmail api request failed: status={status} body={body}")]
    Api { status: StatusCode, body: String },

    #[error("message not found: {id}")]
    NotFound { id: String },

    #[error("decode gmail response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// One page of message identifiers. An absent `next_page_token` means the
/// listing is exhausted; an empty `ids` list must also be treated as the end
/// of results even if a token was returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// The minimal header set needed for filtering. Headers missing from the
/// message are represented as empty strings, never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub date_raw: String,
}

#[async_trait(?Send)]
pub trait MailStore {
    /// Fetch one page of message ids. Pass `None` for the first page, then
    /// exactly the token returned by the previous call.
    async fn list_page(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, StoreError>;

    /// Fetch the From/Subject/Date headers for a single message.
    async fn fetch_summary(&self, id: &str) -> Result<MessageSummary, StoreError>;

    /// Permanently delete all listed messages in a single bulk request.
    /// Irreversible; callers must gate this behind operator confirmation.
    async fn batch_delete(&self, ids: &[String]) -> Result<(), StoreError>;
}
