//! Typed client for the remote resource collections.
//!
//! Thin pass-through layer: each operation validates its input, calls the
//! platform ports, and parses the result into a typed record. No caching
//! happens here; side effects are confined to the external store. The one
//! nontrivial rule is the two-phase image upload: once a file upload has
//! succeeded, every later failure path must delete that file again so the
//! object store is never left holding an orphan.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CollectionsConfig;
use crate::error::{Error, Result};
use crate::platform::{AuthSession, ListQuery, Platform, StoredFile};

use super::types::{
  post_fields, split_tags, validate_email, validate_password, CommentRecord, NewComment, NewPost,
  NewUser, PostRecord, SavedRecord, UpdatePost, UpdateUser, UserRecord,
};

/// Fixed page size for the paginated post feed.
pub const POSTS_PAGE_SIZE: usize = 9;
/// Item cap for the recent-posts listing.
pub const RECENT_POSTS_LIMIT: usize = 20;

/// View URLs longer than this are rejected (document field limit).
const MAX_IMAGE_URL_LEN: usize = 2000;

/// Avatar preview dimensions used for profile images.
const AVATAR_PREVIEW_DIM: u32 = 2000;

pub struct ApiClient<P> {
  platform: Arc<P>,
  collections: CollectionsConfig,
}

impl<P> Clone for ApiClient<P> {
  fn clone(&self) -> Self {
    Self {
      platform: Arc::clone(&self.platform),
      collections: self.collections.clone(),
    }
  }
}

impl<P: Platform> ApiClient<P> {
  pub fn new(platform: Arc<P>, collections: CollectionsConfig) -> Self {
    Self {
      platform,
      collections,
    }
  }

  pub fn platform(&self) -> &Arc<P> {
    &self.platform
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  /// Create an account and its user document.
  pub async fn create_user_account(&self, user: &NewUser) -> Result<UserRecord> {
    user.validate()?;

    let account = self
      .platform
      .create_account(&user.email, &user.password, &user.name)
      .await?;

    let avatar = self.platform.initials_avatar_url(&account.name);
    let doc = self
      .platform
      .create_document(
        &self.collections.users,
        json!({
          "accountId": account.id,
          "name": account.name,
          "email": account.email,
          "username": user.username,
          "imageUrl": avatar.as_str(),
        }),
      )
      .await?;

    debug!(account_id = %account.id, "created user account");
    UserRecord::from_document(doc)
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
    validate_email(email)?;
    validate_password(password)?;
    self.platform.create_email_session(email, password).await
  }

  pub async fn sign_out(&self) -> Result<()> {
    self.platform.delete_current_session().await
  }

  /// Identity round trip: current account, then its user document.
  pub async fn get_current_user(&self) -> Result<UserRecord> {
    let account = self.platform.get_account().await?;

    let list = self
      .platform
      .list_documents(
        &self.collections.users,
        &ListQuery::new().equal("accountId", &account.id),
      )
      .await?;

    let doc = list.documents.into_iter().next().ok_or(Error::NotFound)?;
    UserRecord::from_document(doc)
  }

  // ==========================================================================
  // Posts
  // ==========================================================================

  /// Two-phase create: upload the image, then write the document. Any
  /// failure after the upload deletes the uploaded file before returning.
  pub async fn create_post(&self, post: &NewPost) -> Result<PostRecord> {
    post.validate()?;

    let file = self
      .platform
      .upload_file(&post.image.filename, post.image.bytes.clone())
      .await?;

    match self.create_post_document(post, &file).await {
      Ok(record) => Ok(record),
      Err(e) => {
        self.discard_file(&file.id).await;
        Err(e)
      }
    }
  }

  async fn create_post_document(&self, post: &NewPost, file: &StoredFile) -> Result<PostRecord> {
    let image_url = self.platform.file_view_url(&file.id);
    if image_url.as_str().len() > MAX_IMAGE_URL_LEN {
      return Err(Error::Validation("image URL is too long".to_string()));
    }

    let tags = split_tags(&post.tags);
    let doc = self
      .platform
      .create_document(
        &self.collections.posts,
        post_fields(
          &post.creator_id,
          &post.caption,
          image_url.as_str(),
          &file.id,
          &post.location,
          &tags,
        ),
      )
      .await?;

    PostRecord::from_document(doc)
  }

  /// Update a post, optionally replacing its image. A replacement follows
  /// the same two-phase rule as create; the old file is removed only after
  /// the document update has succeeded.
  pub async fn update_post(&self, update: &UpdatePost) -> Result<PostRecord> {
    update.validate()?;

    let new_file = match &update.new_image {
      Some(image) => Some(
        self
          .platform
          .upload_file(&image.filename, image.bytes.clone())
          .await?,
      ),
      None => None,
    };

    let (image_url, image_id) = match &new_file {
      Some(file) => {
        let url = self.platform.file_view_url(&file.id);
        if url.as_str().len() > MAX_IMAGE_URL_LEN {
          self.discard_file(&file.id).await;
          return Err(Error::Validation("image URL is too long".to_string()));
        }
        (url.as_str().to_string(), file.id.clone())
      }
      None => (update.image_url.clone(), update.image_id.clone()),
    };

    let tags = split_tags(&update.tags);
    let result = self
      .platform
      .update_document(
        &self.collections.posts,
        &update.post_id,
        json!({
          "caption": update.caption,
          "imageUrl": image_url,
          "imageId": image_id,
          "location": update.location,
          "tags": tags,
        }),
      )
      .await;

    let doc = match result {
      Ok(doc) => doc,
      Err(e) => {
        if let Some(file) = &new_file {
          self.discard_file(&file.id).await;
        }
        return Err(e);
      }
    };

    // The replaced image is unreferenced now
    if new_file.is_some() && !update.image_id.is_empty() {
      self.discard_file(&update.image_id).await;
    }

    PostRecord::from_document(doc)
  }

  pub async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<()> {
    if post_id.is_empty() || image_id.is_empty() {
      return Err(Error::Validation("post id and image id are required".to_string()));
    }

    self
      .platform
      .delete_document(&self.collections.posts, post_id)
      .await?;
    self.discard_file(image_id).await;
    Ok(())
  }

  /// Replace a post's like list.
  pub async fn like_post(&self, post_id: &str, likes: &[String]) -> Result<PostRecord> {
    let doc = self
      .platform
      .update_document(&self.collections.posts, post_id, json!({ "likes": likes }))
      .await?;
    PostRecord::from_document(doc)
  }

  pub async fn get_post_by_id(&self, post_id: &str) -> Result<PostRecord> {
    let doc = self
      .platform
      .get_document(&self.collections.posts, post_id)
      .await?;
    PostRecord::from_document(doc)
  }

  pub async fn get_recent_posts(&self) -> Result<Vec<PostRecord>> {
    let list = self
      .platform
      .list_documents(
        &self.collections.posts,
        &ListQuery::new()
          .order_desc_created()
          .limit(RECENT_POSTS_LIMIT),
      )
      .await?;

    list
      .documents
      .into_iter()
      .map(PostRecord::from_document)
      .collect()
  }

  /// One page of the infinite feed; pages are 1-based.
  pub async fn get_posts_page(&self, page: usize) -> Result<Vec<PostRecord>> {
    if page == 0 {
      return Err(Error::Validation("page numbers start at 1".to_string()));
    }

    let list = self
      .platform
      .list_documents(
        &self.collections.posts,
        &ListQuery::new()
          .order_desc_updated()
          .limit(POSTS_PAGE_SIZE)
          .offset((page - 1) * POSTS_PAGE_SIZE),
      )
      .await?;

    list
      .documents
      .into_iter()
      .map(PostRecord::from_document)
      .collect()
  }

  pub async fn search_posts(&self, term: &str) -> Result<Vec<PostRecord>> {
    let list = self
      .platform
      .list_documents(
        &self.collections.posts,
        &ListQuery::new().search("caption", term),
      )
      .await?;

    list
      .documents
      .into_iter()
      .map(PostRecord::from_document)
      .collect()
  }

  // ==========================================================================
  // Saves
  // ==========================================================================

  /// Save a post for a user. The store does not enforce uniqueness of the
  /// (user, post) pair, so look up first and hand back an existing record
  /// instead of creating a duplicate.
  pub async fn save_post(&self, user_id: &str, post_id: &str) -> Result<SavedRecord> {
    let existing = self
      .platform
      .list_documents(
        &self.collections.saves,
        &ListQuery::new().equal("user", user_id).equal("post", post_id),
      )
      .await?;

    if let Some(doc) = existing.documents.into_iter().next() {
      debug!(%user_id, %post_id, "post already saved");
      return SavedRecord::from_document(doc);
    }

    let doc = self
      .platform
      .create_document(
        &self.collections.saves,
        json!({ "user": user_id, "post": post_id }),
      )
      .await?;
    SavedRecord::from_document(doc)
  }

  pub async fn delete_saved_post(&self, saved_id: &str) -> Result<()> {
    self
      .platform
      .delete_document(&self.collections.saves, saved_id)
      .await
  }

  pub async fn get_saved_posts(&self, user_id: &str) -> Result<Vec<SavedRecord>> {
    let list = self
      .platform
      .list_documents(
        &self.collections.saves,
        &ListQuery::new().equal("user", user_id),
      )
      .await?;

    list
      .documents
      .into_iter()
      .map(SavedRecord::from_document)
      .collect()
  }

  // ==========================================================================
  // Comments
  // ==========================================================================

  pub async fn add_comment(
    &self,
    post_id: &str,
    author_id: &str,
    comment: &NewComment,
  ) -> Result<CommentRecord> {
    comment.validate()?;

    let doc = self
      .platform
      .create_document(
        &self.collections.comments,
        json!({
          "comment": comment.text,
          "post": post_id,
          "user": author_id,
        }),
      )
      .await?;
    CommentRecord::from_document(doc)
  }

  /// Comments for a post; an empty list is a valid result, not an error.
  pub async fn get_comments(&self, post_id: &str) -> Result<Vec<CommentRecord>> {
    let list = self
      .platform
      .list_documents(
        &self.collections.comments,
        &ListQuery::new().equal("post", post_id),
      )
      .await?;

    list
      .documents
      .into_iter()
      .map(CommentRecord::from_document)
      .collect()
  }

  pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
    self
      .platform
      .delete_document(&self.collections.comments, comment_id)
      .await
  }

  // ==========================================================================
  // Users
  // ==========================================================================

  pub async fn get_user_by_id(&self, user_id: &str) -> Result<UserRecord> {
    let doc = self
      .platform
      .get_document(&self.collections.users, user_id)
      .await?;
    UserRecord::from_document(doc)
  }

  pub async fn get_users(&self, limit: Option<usize>) -> Result<Vec<UserRecord>> {
    let mut query = ListQuery::new().order_desc_created();
    if let Some(limit) = limit {
      query = query.limit(limit);
    }

    let list = self
      .platform
      .list_documents(&self.collections.users, &query)
      .await?;

    list
      .documents
      .into_iter()
      .map(UserRecord::from_document)
      .collect()
  }

  /// Update a profile, optionally replacing the avatar. Same two-phase rule
  /// as posts; the old avatar is removed only after a successful update.
  pub async fn update_user(&self, update: &UpdateUser) -> Result<UserRecord> {
    update.validate()?;

    let new_file = match &update.new_image {
      Some(image) => Some(
        self
          .platform
          .upload_file(&image.filename, image.bytes.clone())
          .await?,
      ),
      None => None,
    };

    let (image_url, image_id) = match &new_file {
      Some(file) => {
        let url = self
          .platform
          .file_preview_url(&file.id, AVATAR_PREVIEW_DIM, AVATAR_PREVIEW_DIM);
        (url.as_str().to_string(), file.id.clone())
      }
      None => (update.image_url.clone(), update.image_id.clone()),
    };

    let result = self
      .platform
      .update_document(
        &self.collections.users,
        &update.user_id,
        json!({
          "name": update.name,
          "bio": update.bio,
          "imageUrl": image_url,
          "imageId": image_id,
        }),
      )
      .await;

    let doc = match result {
      Ok(doc) => doc,
      Err(e) => {
        if let Some(file) = &new_file {
          self.discard_file(&file.id).await;
        }
        return Err(e);
      }
    };

    if new_file.is_some() && !update.image_id.is_empty() {
      self.discard_file(&update.image_id).await;
    }

    UserRecord::from_document(doc)
  }

  /// Compensating delete. A failure here leaves an orphan in the object
  /// store, which is worth a warning but must not mask the primary error.
  async fn discard_file(&self, file_id: &str) {
    if let Err(e) = self.platform.delete_file(file_id).await {
      warn!(%file_id, error = %e, "failed to delete file; orphan left in object store");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::ImageUpload;
  use crate::platform::{FaultPoint, MemoryPlatform};

  fn client() -> (Arc<MemoryPlatform>, ApiClient<MemoryPlatform>) {
    let platform = Arc::new(MemoryPlatform::new());
    let client = ApiClient::new(Arc::clone(&platform), CollectionsConfig::default());
    (platform, client)
  }

  fn new_post(creator: &str) -> NewPost {
    NewPost {
      creator_id: creator.to_string(),
      caption: "a perfectly fine caption".to_string(),
      image: ImageUpload {
        filename: "sunset.png".to_string(),
        bytes: vec![0xff, 0xd8],
      },
      location: "Lisbon".to_string(),
      tags: "sunset, travel".to_string(),
    }
  }

  async fn signed_up_user(client: &ApiClient<MemoryPlatform>) -> UserRecord {
    let user = client
      .create_user_account(&NewUser {
        name: "Alice".to_string(),
        username: "alice".to_string(),
        email: "a@b.com".to_string(),
        password: "12345678".to_string(),
      })
      .await
      .unwrap();
    client.sign_in("a@b.com", "12345678").await.unwrap();
    user
  }

  #[tokio::test]
  async fn signup_creates_account_and_user_document() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;

    assert_eq!(user.username, "alice");
    assert!(user.image_url.contains("initials"));
    assert_eq!(platform.document_count("users"), 1);

    let current = client.get_current_user().await.unwrap();
    assert_eq!(current.id, user.id);
  }

  #[tokio::test]
  async fn current_user_without_session_is_unauthorized() {
    let (_platform, client) = client();
    assert!(matches!(
      client.get_current_user().await,
      Err(Error::Unauthorized)
    ));
  }

  #[tokio::test]
  async fn create_post_stores_file_and_document() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;

    let post = client.create_post(&new_post(&user.id)).await.unwrap();
    assert_eq!(post.creator_id, user.id);
    assert_eq!(post.tags, vec!["sunset".to_string(), "travel".to_string()]);
    assert!(post.likes.is_empty());
    assert!(platform.file_exists(&post.image_id));
  }

  #[tokio::test]
  async fn failed_document_create_deletes_the_uploaded_file() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;

    platform.fail_next(
      FaultPoint::CreateDocument,
      Error::Transport("backend down".to_string()),
    );

    let err = client.create_post(&new_post(&user.id)).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // Compensating delete ran: no orphan left behind
    assert_eq!(platform.file_count(), 0);
    assert_eq!(platform.document_count("posts"), 0);
  }

  #[tokio::test]
  async fn invalid_caption_fails_before_any_upload() {
    let (platform, client) = client();
    let mut post = new_post("u1");
    post.caption = "hey".to_string();

    assert!(matches!(
      client.create_post(&post).await,
      Err(Error::Validation(_))
    ));
    assert_eq!(platform.file_count(), 0);
  }

  #[tokio::test]
  async fn update_post_with_new_image_swaps_files() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;
    let post = client.create_post(&new_post(&user.id)).await.unwrap();

    let updated = client
      .update_post(&UpdatePost {
        post_id: post.id.clone(),
        caption: "updated caption".to_string(),
        image_url: post.image_url.clone(),
        image_id: post.image_id.clone(),
        location: post.location.clone(),
        tags: "new".to_string(),
        new_image: Some(ImageUpload {
          filename: "other.png".to_string(),
          bytes: vec![1, 2, 3],
        }),
      })
      .await
      .unwrap();

    assert_ne!(updated.image_id, post.image_id);
    assert!(platform.file_exists(&updated.image_id));
    assert!(!platform.file_exists(&post.image_id));
  }

  #[tokio::test]
  async fn failed_update_keeps_old_image_and_discards_new_one() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;
    let post = client.create_post(&new_post(&user.id)).await.unwrap();

    platform.fail_next(
      FaultPoint::UpdateDocument,
      Error::Transport("backend down".to_string()),
    );

    let err = client
      .update_post(&UpdatePost {
        post_id: post.id.clone(),
        caption: "updated caption".to_string(),
        image_url: post.image_url.clone(),
        image_id: post.image_id.clone(),
        location: post.location.clone(),
        tags: String::new(),
        new_image: Some(ImageUpload {
          filename: "other.png".to_string(),
          bytes: vec![1, 2, 3],
        }),
      })
      .await
      .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(platform.file_exists(&post.image_id));
    assert_eq!(platform.file_count(), 1);
  }

  #[tokio::test]
  async fn save_post_is_idempotent_per_user_and_post() {
    let (platform, client) = client();
    let user = signed_up_user(&client).await;
    let post = client.create_post(&new_post(&user.id)).await.unwrap();

    let first = client.save_post(&user.id, &post.id).await.unwrap();
    let second = client.save_post(&user.id, &post.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(platform.document_count("saves"), 1);

    client.delete_saved_post(&first.id).await.unwrap();
    assert_eq!(platform.document_count("saves"), 0);
  }

  #[tokio::test]
  async fn comments_round_trip_and_empty_list_is_ok() {
    let (_platform, client) = client();
    let user = signed_up_user(&client).await;
    let post = client.create_post(&new_post(&user.id)).await.unwrap();

    assert!(client.get_comments(&post.id).await.unwrap().is_empty());

    let comment = client
      .add_comment(
        &post.id,
        &user.id,
        &NewComment {
          text: "nice shot".to_string(),
        },
      )
      .await
      .unwrap();
    assert_eq!(comment.post_id, post.id);

    let comments = client.get_comments(&post.id).await.unwrap();
    assert_eq!(comments.len(), 1);

    client.delete_comment(&comment.id).await.unwrap();
    assert!(client.get_comments(&post.id).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn recent_posts_are_newest_first_and_capped() {
    let (_platform, client) = client();
    let user = signed_up_user(&client).await;
    for _ in 0..3 {
      client.create_post(&new_post(&user.id)).await.unwrap();
    }

    let posts = client.get_recent_posts().await.unwrap();
    assert_eq!(posts.len(), 3);
    for pair in posts.windows(2) {
      assert!(pair[0].created_at >= pair[1].created_at);
    }
  }

  #[tokio::test]
  async fn posts_page_rejects_page_zero() {
    let (_platform, client) = client();
    assert!(matches!(
      client.get_posts_page(0).await,
      Err(Error::Validation(_))
    ));
  }

  #[tokio::test]
  async fn like_post_replaces_the_like_list() {
    let (_platform, client) = client();
    let user = signed_up_user(&client).await;
    let post = client.create_post(&new_post(&user.id)).await.unwrap();

    let liked = client
      .like_post(&post.id, &[user.id.clone()])
      .await
      .unwrap();
    assert_eq!(liked.likes, vec![user.id.clone()]);

    let unliked = client.like_post(&post.id, &[]).await.unwrap();
    assert!(unliked.likes.is_empty());
  }
}
