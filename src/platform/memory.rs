//! In-memory implementation of the platform ports.
//!
//! Backs tests and offline development: accounts, documents with full list
//! query support, and files all live in a mutex-guarded map. Fault injection
//! lets a test make the next call at a given point fail with a chosen error,
//! which is how the two-phase upload and optimistic-update paths are
//! exercised without a network.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use crate::error::{Error, Result};

use super::{
  Account, AuthSession, Document, DocumentList, DocumentStore, IdentityService, ListQuery,
  ObjectStore, OrderBy, StoredFile,
};

/// Call sites where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
  CreateAccount,
  CreateSession,
  GetAccount,
  CreateDocument,
  UpdateDocument,
  DeleteDocument,
  ListDocuments,
  UploadFile,
  DeleteFile,
}

struct StoredAccount {
  id: String,
  email: String,
  password: String,
  name: String,
}

#[derive(Default)]
struct State {
  next_id: u64,
  accounts: Vec<StoredAccount>,
  current_session: Option<AuthSession>,
  collections: HashMap<String, Vec<Document>>,
  files: HashMap<String, (String, Vec<u8>)>,
  faults: HashMap<FaultPoint, Error>,
}

impl State {
  fn mint_id(&mut self, prefix: &str) -> String {
    self.next_id += 1;
    format!("{}{}", prefix, self.next_id)
  }

  fn take_fault(&mut self, point: FaultPoint) -> Result<()> {
    match self.faults.remove(&point) {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

#[derive(Default)]
pub struct MemoryPlatform {
  state: Mutex<State>,
}

impl MemoryPlatform {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make the next call hitting `point` fail with `error`.
  pub fn fail_next(&self, point: FaultPoint, error: Error) {
    self.lock().faults.insert(point, error);
  }

  /// Whether a file with this id is currently stored.
  pub fn file_exists(&self, file_id: &str) -> bool {
    self.lock().files.contains_key(file_id)
  }

  pub fn file_count(&self) -> usize {
    self.lock().files.len()
  }

  pub fn document_count(&self, collection: &str) -> usize {
    self
      .lock()
      .collections
      .get(collection)
      .map(|docs| docs.len())
      .unwrap_or(0)
  }

  /// Seed a document directly, bypassing the client path. Returns its id.
  pub fn seed_document(&self, collection: &str, data: Value) -> String {
    let mut state = self.lock();
    let id = state.mint_id("doc");
    let now = Utc::now();
    state
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document {
        id: id.clone(),
        created_at: now,
        updated_at: now,
        data,
      });
    id
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    // A poisoned lock means a panicking test; the state is still usable
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }
}

fn matches_query(doc: &Document, query: &ListQuery) -> bool {
  for (field, value) in &query.equal {
    match doc.data.get(field) {
      Some(Value::String(s)) if s == value => {}
      _ => return false,
    }
  }
  if let Some((field, term)) = &query.search {
    match doc.data.get(field) {
      Some(Value::String(s)) if s.to_lowercase().contains(&term.to_lowercase()) => {}
      _ => return false,
    }
  }
  true
}

#[async_trait]
impl IdentityService for MemoryPlatform {
  async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Account> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::CreateAccount)?;

    if state.accounts.iter().any(|a| a.email == email) {
      return Err(Error::Validation(format!(
        "account with email {} already exists",
        email
      )));
    }

    let id = state.mint_id("acct");
    state.accounts.push(StoredAccount {
      id: id.clone(),
      email: email.to_string(),
      password: password.to_string(),
      name: name.to_string(),
    });

    Ok(Account {
      id,
      name: name.to_string(),
      email: email.to_string(),
    })
  }

  async fn create_email_session(&self, email: &str, password: &str) -> Result<AuthSession> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::CreateSession)?;

    let account = state
      .accounts
      .iter()
      .find(|a| a.email == email && a.password == password)
      .ok_or(Error::Unauthorized)?;
    let user_id = account.id.clone();

    let id = state.mint_id("sess");
    let session = AuthSession { id, user_id };
    state.current_session = Some(session.clone());

    Ok(session)
  }

  async fn get_account(&self) -> Result<Account> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::GetAccount)?;

    let session = state.current_session.clone().ok_or(Error::Unauthorized)?;
    let account = state
      .accounts
      .iter()
      .find(|a| a.id == session.user_id)
      .ok_or(Error::Unauthorized)?;

    Ok(Account {
      id: account.id.clone(),
      name: account.name.clone(),
      email: account.email.clone(),
    })
  }

  async fn delete_current_session(&self) -> Result<()> {
    let mut state = self.lock();
    if state.current_session.take().is_none() {
      return Err(Error::Unauthorized);
    }
    Ok(())
  }

  fn initials_avatar_url(&self, name: &str) -> Url {
    let mut url = Url::parse("memory://avatars/initials").expect("static url");
    url.query_pairs_mut().append_pair("name", name);
    url
  }
}

#[async_trait]
impl DocumentStore for MemoryPlatform {
  async fn create_document(&self, collection: &str, data: Value) -> Result<Document> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::CreateDocument)?;

    if !data.is_object() {
      return Err(Error::Validation("document data must be an object".to_string()));
    }

    let id = state.mint_id("doc");
    let now = Utc::now();
    let doc = Document {
      id,
      created_at: now,
      updated_at: now,
      data,
    };
    state
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(doc.clone());

    Ok(doc)
  }

  async fn get_document(&self, collection: &str, id: &str) -> Result<Document> {
    let state = self.lock();
    state
      .collections
      .get(collection)
      .and_then(|docs| docs.iter().find(|d| d.id == id))
      .cloned()
      .ok_or(Error::NotFound)
  }

  async fn list_documents(&self, collection: &str, query: &ListQuery) -> Result<DocumentList> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::ListDocuments)?;

    let mut matched: Vec<Document> = state
      .collections
      .get(collection)
      .map(|docs| {
        docs
          .iter()
          .filter(|d| matches_query(d, query))
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    match query.order {
      Some(OrderBy::CreatedAtDesc) => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
      Some(OrderBy::UpdatedAtDesc) => matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
      None => {}
    }

    let total = matched.len();
    let offset = query.offset.unwrap_or(0).min(matched.len());
    let mut documents = matched.split_off(offset);
    if let Some(limit) = query.limit {
      documents.truncate(limit);
    }

    Ok(DocumentList { total, documents })
  }

  async fn update_document(&self, collection: &str, id: &str, data: Value) -> Result<Document> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::UpdateDocument)?;

    let Value::Object(updates) = data else {
      return Err(Error::Validation("document data must be an object".to_string()));
    };

    let doc = state
      .collections
      .get_mut(collection)
      .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
      .ok_or(Error::NotFound)?;

    if let Value::Object(fields) = &mut doc.data {
      for (key, value) in updates {
        fields.insert(key, value);
      }
    }
    doc.updated_at = Utc::now();

    Ok(doc.clone())
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::DeleteDocument)?;

    let docs = state.collections.get_mut(collection).ok_or(Error::NotFound)?;
    let before = docs.len();
    docs.retain(|d| d.id != id);
    if docs.len() == before {
      return Err(Error::NotFound);
    }
    Ok(())
  }
}

#[async_trait]
impl ObjectStore for MemoryPlatform {
  async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<StoredFile> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::UploadFile)?;

    let id = state.mint_id("file");
    state
      .files
      .insert(id.clone(), (filename.to_string(), bytes));

    Ok(StoredFile {
      id,
      name: filename.to_string(),
    })
  }

  fn file_view_url(&self, file_id: &str) -> Url {
    Url::parse(&format!("memory://files/{}/view", file_id)).expect("static url")
  }

  fn file_preview_url(&self, file_id: &str, width: u32, height: u32) -> Url {
    Url::parse(&format!(
      "memory://files/{}/preview?width={}&height={}",
      file_id, width, height
    ))
    .expect("static url")
  }

  async fn delete_file(&self, file_id: &str) -> Result<()> {
    let mut state = self.lock();
    state.take_fault(FaultPoint::DeleteFile)?;

    state.files.remove(file_id).ok_or(Error::NotFound)?;
    Ok(())
  }
}
