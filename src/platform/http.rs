//! HTTP implementation of the platform ports.
//!
//! Speaks the hosted platform's REST API: `/account` for identity,
//! `/databases/{db}/collections/{c}/documents` for documents, and
//! `/storage/buckets/{b}/files` for objects. Sessions are cookie-based, so
//! the reqwest client keeps a cookie store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{multipart, Method};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};

use super::{
  Account, AuthSession, Document, DocumentList, DocumentStore, IdentityService, ListQuery,
  ObjectStore, StoredFile, UNIQUE_ID,
};

#[derive(Clone)]
pub struct HttpPlatform {
  http: reqwest::Client,
  endpoint: Url,
  project: String,
  database_id: String,
  bucket_id: String,
  /// Server-side API key; browser-style cookie sessions work without one
  api_key: Option<String>,
}

impl HttpPlatform {
  pub fn new(config: &Config) -> Result<Self> {
    let http = reqwest::Client::builder()
      .cookie_store(true)
      .build()
      .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

    let mut endpoint = Url::parse(&config.platform.endpoint)
      .map_err(|e| Error::Config(format!("Invalid platform endpoint: {}", e)))?;
    // A trailing slash keeps Url::join from eating the last path segment
    if !endpoint.path().ends_with('/') {
      endpoint.set_path(&format!("{}/", endpoint.path()));
    }

    Ok(Self {
      http,
      endpoint,
      project: config.platform.project.clone(),
      database_id: config.platform.database_id.clone(),
      bucket_id: config.platform.bucket_id.clone(),
      api_key: Config::get_api_key().ok(),
    })
  }

  /// Use an explicit API key instead of the environment lookup.
  pub fn with_api_key(mut self, key: &str) -> Self {
    self.api_key = Some(key.to_string());
    self
  }

  /// Request with the platform headers every endpoint requires.
  fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
    let mut req = self
      .http
      .request(method, url)
      .header("X-Platform-Project", &self.project);
    if let Some(key) = &self.api_key {
      req = req.header("X-Platform-Key", key);
    }
    req
  }

  fn url(&self, path: &str) -> Url {
    // Paths are built from config ids and document ids; join only fails on
    // malformed input the config loader already rejected.
    self
      .endpoint
      .join(path)
      .unwrap_or_else(|_| self.endpoint.clone())
  }

  fn documents_path(&self, collection: &str) -> String {
    format!(
      "databases/{}/collections/{}/documents",
      self.database_id, collection
    )
  }

  async fn expect_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      return Err(Self::response_error(status, resp).await);
    }
    resp.json::<T>().await.map_err(Error::from)
  }

  async fn expect_ok(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if !status.is_success() {
      return Err(Self::response_error(status, resp).await);
    }
    Ok(())
  }

  async fn response_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    #[derive(Deserialize)]
    struct ErrorBody {
      message: String,
    }

    let message = resp
      .json::<ErrorBody>()
      .await
      .map(|b| b.message)
      .unwrap_or_else(|_| "request failed".to_string());

    debug!(%status, %message, "platform request failed");
    Error::from_status(status, &message)
  }
}

/// Split a wire document into platform metadata and the field payload.
fn parse_document(value: Value) -> Result<Document> {
  let Value::Object(mut map) = value else {
    return Err(Error::Validation("document is not an object".to_string()));
  };

  let id = take_string(&mut map, "$id")?;
  let created_at = take_datetime(&mut map, "$createdAt")?;
  let updated_at = take_datetime(&mut map, "$updatedAt")?;

  // Remaining $-prefixed keys are platform metadata the client never reads
  map.retain(|k, _| !k.starts_with('$'));

  Ok(Document {
    id,
    created_at,
    updated_at,
    data: Value::Object(map),
  })
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String> {
  match map.remove(key) {
    Some(Value::String(s)) => Ok(s),
    _ => Err(Error::Validation(format!("document missing {}", key))),
  }
}

fn take_datetime(map: &mut Map<String, Value>, key: &str) -> Result<DateTime<Utc>> {
  let raw = take_string(map, key)?;
  DateTime::parse_from_rfc3339(&raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Validation(format!("bad {} timestamp '{}': {}", key, raw, e)))
}

#[derive(Deserialize)]
struct AccountDto {
  #[serde(rename = "$id")]
  id: String,
  name: String,
  email: String,
}

impl From<AccountDto> for Account {
  fn from(dto: AccountDto) -> Self {
    Account {
      id: dto.id,
      name: dto.name,
      email: dto.email,
    }
  }
}

#[derive(Deserialize)]
struct SessionDto {
  #[serde(rename = "$id")]
  id: String,
  #[serde(rename = "userId")]
  user_id: String,
}

#[derive(Deserialize)]
struct FileDto {
  #[serde(rename = "$id")]
  id: String,
  name: String,
}

#[derive(Deserialize)]
struct DocumentListDto {
  total: usize,
  documents: Vec<Value>,
}

#[async_trait]
impl IdentityService for HttpPlatform {
  async fn create_account(&self, email: &str, password: &str, name: &str) -> Result<Account> {
    let resp = self
      .request(Method::POST, self.url("account"))
      .json(&json!({
        "userId": UNIQUE_ID,
        "email": email,
        "password": password,
        "name": name,
      }))
      .send()
      .await?;

    Ok(Self::expect_json::<AccountDto>(resp).await?.into())
  }

  async fn create_email_session(&self, email: &str, password: &str) -> Result<AuthSession> {
    let resp = self
      .request(Method::POST, self.url("account/sessions/email"))
      .json(&json!({ "email": email, "password": password }))
      .send()
      .await?;

    let dto = Self::expect_json::<SessionDto>(resp).await?;
    Ok(AuthSession {
      id: dto.id,
      user_id: dto.user_id,
    })
  }

  async fn get_account(&self) -> Result<Account> {
    let resp = self
      .request(Method::GET, self.url("account"))
      .send()
      .await?;

    Ok(Self::expect_json::<AccountDto>(resp).await?.into())
  }

  async fn delete_current_session(&self) -> Result<()> {
    let resp = self
      .request(Method::DELETE, self.url("account/sessions/current"))
      .send()
      .await?;

    Self::expect_ok(resp).await
  }

  fn initials_avatar_url(&self, name: &str) -> Url {
    let mut url = self.url("avatars/initials");
    url
      .query_pairs_mut()
      .append_pair("name", name)
      .append_pair("project", &self.project);
    url
  }
}

#[async_trait]
impl DocumentStore for HttpPlatform {
  async fn create_document(&self, collection: &str, data: Value) -> Result<Document> {
    let resp = self
      .request(Method::POST, self.url(&self.documents_path(collection)))
      .json(&json!({ "documentId": UNIQUE_ID, "data": data }))
      .send()
      .await?;

    parse_document(Self::expect_json(resp).await?)
  }

  async fn get_document(&self, collection: &str, id: &str) -> Result<Document> {
    let resp = self
      .request(
        Method::GET,
        self.url(&format!("{}/{}", self.documents_path(collection), id)),
      )
      .send()
      .await?;

    parse_document(Self::expect_json(resp).await?)
  }

  async fn list_documents(&self, collection: &str, query: &ListQuery) -> Result<DocumentList> {
    let mut url = self.url(&self.documents_path(collection));
    for q in query.to_wire() {
      url.query_pairs_mut().append_pair("queries[]", &q);
    }

    let resp = self.request(Method::GET, url).send()
      .await?;

    let dto = Self::expect_json::<DocumentListDto>(resp).await?;
    let documents = dto
      .documents
      .into_iter()
      .map(parse_document)
      .collect::<Result<Vec<_>>>()?;

    Ok(DocumentList {
      total: dto.total,
      documents,
    })
  }

  async fn update_document(&self, collection: &str, id: &str, data: Value) -> Result<Document> {
    let resp = self
      .request(
        Method::PATCH,
        self.url(&format!("{}/{}", self.documents_path(collection), id)),
      )
      .json(&json!({ "data": data }))
      .send()
      .await?;

    parse_document(Self::expect_json(resp).await?)
  }

  async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
    let resp = self
      .request(
        Method::DELETE,
        self.url(&format!("{}/{}", self.documents_path(collection), id)),
      )
      .send()
      .await?;

    Self::expect_ok(resp).await
  }
}

#[async_trait]
impl ObjectStore for HttpPlatform {
  async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<StoredFile> {
    let form = multipart::Form::new().text("fileId", UNIQUE_ID).part(
      "file",
      multipart::Part::bytes(bytes).file_name(filename.to_string()),
    );

    let resp = self
      .request(
        Method::POST,
        self.url(&format!("storage/buckets/{}/files", self.bucket_id)),
      )
      .multipart(form)
      .send()
      .await?;

    let dto = Self::expect_json::<FileDto>(resp).await?;
    Ok(StoredFile {
      id: dto.id,
      name: dto.name,
    })
  }

  fn file_view_url(&self, file_id: &str) -> Url {
    let mut url = self.url(&format!(
      "storage/buckets/{}/files/{}/view",
      self.bucket_id, file_id
    ));
    url.query_pairs_mut().append_pair("project", &self.project);
    url
  }

  fn file_preview_url(&self, file_id: &str, width: u32, height: u32) -> Url {
    let mut url = self.url(&format!(
      "storage/buckets/{}/files/{}/preview",
      self.bucket_id, file_id
    ));
    url
      .query_pairs_mut()
      .append_pair("width", &width.to_string())
      .append_pair("height", &height.to_string())
      .append_pair("gravity", "top")
      .append_pair("quality", "100")
      .append_pair("project", &self.project);
    url
  }

  async fn delete_file(&self, file_id: &str) -> Result<()> {
    let resp = self
      .request(
        Method::DELETE,
        self.url(&format!(
          "storage/buckets/{}/files/{}",
          self.bucket_id, file_id
        )),
      )
      .send()
      .await?;

    Self::expect_ok(resp).await
  }
}
