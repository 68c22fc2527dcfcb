//! Ports for the hosted platform's three services.
//!
//! The backend is consumed only through these interfaces: an identity service
//! (accounts and sessions), a document store (collections of JSON documents
//! with list queries), and an object store (binary files addressed by id).
//! [`HttpPlatform`] speaks the platform's REST API; [`MemoryPlatform`] is a
//! complete in-memory implementation used by tests and offline development.
//!
//! Documents travel as raw `serde_json::Value` here; typing and validation
//! happen at the `api` boundary.

mod http;
mod memory;

pub use http::HttpPlatform;
pub use memory::{FaultPoint, MemoryPlatform};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use crate::error::Result;

/// Sentinel id asking the platform to mint a unique identifier.
pub const UNIQUE_ID: &str = "unique()";

/// Account held by the identity service.
#[derive(Debug, Clone)]
pub struct Account {
  pub id: String,
  pub name: String,
  pub email: String,
}

/// An authenticated session created from email + password.
#[derive(Debug, Clone)]
pub struct AuthSession {
  pub id: String,
  pub user_id: String,
}

/// A stored document: platform metadata plus the field payload.
#[derive(Debug, Clone)]
pub struct Document {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  /// Field payload as a JSON object
  pub data: Value,
}

/// Result of a list query.
#[derive(Debug, Clone)]
pub struct DocumentList {
  /// Count of matching documents before limit/offset
  pub total: usize,
  pub documents: Vec<Document>,
}

/// Reference to an uploaded file.
#[derive(Debug, Clone)]
pub struct StoredFile {
  pub id: String,
  pub name: String,
}

/// Descending sort field for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
  CreatedAtDesc,
  UpdatedAtDesc,
}

/// Query over a collection: ordering, equality filters, free-text search,
/// limit, and offset.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
  pub order: Option<OrderBy>,
  pub equal: Vec<(String, String)>,
  pub search: Option<(String, String)>,
  pub limit: Option<usize>,
  pub offset: Option<usize>,
}

impl ListQuery {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn order_desc_created(mut self) -> Self {
    self.order = Some(OrderBy::CreatedAtDesc);
    self
  }

  pub fn order_desc_updated(mut self) -> Self {
    self.order = Some(OrderBy::UpdatedAtDesc);
    self
  }

  pub fn equal(mut self, field: &str, value: &str) -> Self {
    self.equal.push((field.to_string(), value.to_string()));
    self
  }

  pub fn search(mut self, field: &str, term: &str) -> Self {
    self.search = Some((field.to_string(), term.to_string()));
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn offset(mut self, offset: usize) -> Self {
    self.offset = Some(offset);
    self
  }

  /// Serialize to the platform's wire query strings,
  /// e.g. `orderDesc("$createdAt")` or `equal("creator", ["abc"])`.
  pub fn to_wire(&self) -> Vec<String> {
    let mut out = Vec::new();

    match self.order {
      Some(OrderBy::CreatedAtDesc) => out.push("orderDesc(\"$createdAt\")".to_string()),
      Some(OrderBy::UpdatedAtDesc) => out.push("orderDesc(\"$updatedAt\")".to_string()),
      None => {}
    }
    for (field, value) in &self.equal {
      out.push(format!(
        "equal({}, [{}])",
        encode_str(field),
        encode_str(value)
      ));
    }
    if let Some((field, term)) = &self.search {
      out.push(format!(
        "search({}, [{}])",
        encode_str(field),
        encode_str(term)
      ));
    }
    if let Some(limit) = self.limit {
      out.push(format!("limit({})", limit));
    }
    if let Some(offset) = self.offset {
      out.push(format!("offset({})", offset));
    }

    out
  }
}

fn encode_str(s: &str) -> String {
  // JSON string encoding doubles as the wire quoting rule
  serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Identity service: accounts and sessions.
#[async_trait]
pub trait IdentityService: Send + Sync {
  async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Account>;

  async fn create_email_session(&self, email: &str, password: &str) -> Result<AuthSession>;

  /// Current account for the active session. `Err(Unauthorized)` when there
  /// is no session.
  async fn get_account(&self) -> Result<Account>;

  async fn delete_current_session(&self) -> Result<()>;

  /// URL of a generated initials avatar for a display name.
  fn initials_avatar_url(&self, name: &str) -> Url;
}

/// Document store: collections of JSON documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  async fn create_document(&self, collection: &str, data: Value) -> Result<Document>;

  async fn get_document(&self, collection: &str, id: &str) -> Result<Document>;

  async fn list_documents(&self, collection: &str, query: &ListQuery) -> Result<DocumentList>;

  /// Partial update: fields in `data` replace the stored fields of the same
  /// name; other fields are untouched.
  async fn update_document(&self, collection: &str, id: &str, data: Value) -> Result<Document>;

  async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;
}

/// Object store: binary files in a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
  async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<StoredFile>;

  fn file_view_url(&self, file_id: &str) -> Url;

  fn file_preview_url(&self, file_id: &str, width: u32, height: u32) -> Url;

  async fn delete_file(&self, file_id: &str) -> Result<()>;
}

/// Everything the typed client needs, in one bound.
pub trait Platform: IdentityService + DocumentStore + ObjectStore {}

impl<T: IdentityService + DocumentStore + ObjectStore> Platform for T {}
