//! Domain records and input types.
//!
//! Records are parsed out of raw store documents exactly once, at the client
//! boundary; everything past that point works with these structs. Input types
//! carry their own validation so a schema rejection happens before the
//! network is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::platform::Document;

/// A user profile document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
  pub id: String,
  pub account_id: String,
  pub name: String,
  pub username: String,
  pub email: String,
  pub image_url: String,
  pub image_id: String,
  pub bio: String,
  pub created_at: DateTime<Utc>,
}

impl UserRecord {
  pub fn from_document(doc: Document) -> Result<Self> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
      account_id: String,
      name: String,
      #[serde(default)]
      username: String,
      email: String,
      #[serde(default)]
      image_url: String,
      #[serde(default)]
      image_id: String,
      #[serde(default)]
      bio: String,
    }

    let f: Fields = serde_json::from_value(doc.data)?;
    Ok(Self {
      id: doc.id,
      account_id: f.account_id,
      name: f.name,
      username: f.username,
      email: f.email,
      image_url: f.image_url,
      image_id: f.image_id,
      bio: f.bio,
      created_at: doc.created_at,
    })
  }
}

/// A post document. The like list holds identity references, each at most
/// once; duplicates in a stored document are collapsed on parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
  pub id: String,
  pub creator_id: String,
  pub caption: String,
  pub image_url: String,
  pub image_id: String,
  pub location: String,
  pub tags: Vec<String>,
  pub likes: Vec<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl PostRecord {
  pub fn from_document(doc: Document) -> Result<Self> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Fields {
      creator: String,
      caption: String,
      #[serde(default)]
      image_url: String,
      #[serde(default)]
      image_id: String,
      #[serde(default)]
      location: String,
      #[serde(default)]
      tags: Vec<String>,
      #[serde(default)]
      likes: Vec<String>,
    }

    let f: Fields = serde_json::from_value(doc.data)?;

    let mut seen = HashSet::new();
    let mut likes = f.likes;
    likes.retain(|id| seen.insert(id.clone()));

    Ok(Self {
      id: doc.id,
      creator_id: f.creator,
      caption: f.caption,
      image_url: f.image_url,
      image_id: f.image_id,
      location: f.location,
      tags: f.tags,
      likes,
      created_at: doc.created_at,
      updated_at: doc.updated_at,
    })
  }
}

/// A comment: belongs to exactly one post and one author. No edit path;
/// comments are only created and deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
  pub id: String,
  pub post_id: String,
  pub author_id: String,
  pub text: String,
  pub created_at: DateTime<Utc>,
}

impl CommentRecord {
  pub fn from_document(doc: Document) -> Result<Self> {
    #[derive(Deserialize)]
    struct Fields {
      post: String,
      user: String,
      comment: String,
    }

    let f: Fields = serde_json::from_value(doc.data)?;
    Ok(Self {
      id: doc.id,
      post_id: f.post,
      author_id: f.user,
      text: f.comment,
      created_at: doc.created_at,
    })
  }
}

/// Join entity linking one identity to one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRecord {
  pub id: String,
  pub user_id: String,
  pub post_id: String,
  pub created_at: DateTime<Utc>,
}

impl SavedRecord {
  pub fn from_document(doc: Document) -> Result<Self> {
    #[derive(Deserialize)]
    struct Fields {
      user: String,
      post: String,
    }

    let f: Fields = serde_json::from_value(doc.data)?;
    Ok(Self {
      id: doc.id,
      user_id: f.user,
      post_id: f.post,
      created_at: doc.created_at,
    })
  }
}

/// The authenticated identity held by the session gate. Reset to the empty
/// value on logout or a failed identity check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub id: String,
  pub name: String,
  pub username: String,
  pub email: String,
  pub image_url: String,
  pub bio: String,
  pub authenticated: bool,
}

impl From<UserRecord> for Session {
  fn from(user: UserRecord) -> Self {
    Session {
      id: user.id,
      name: user.name,
      username: user.username,
      email: user.email,
      image_url: user.image_url,
      bio: user.bio,
      authenticated: true,
    }
  }
}

// ============================================================================
// Input types
// ============================================================================

const NAME_MIN: usize = 2;
const USERNAME_MIN: usize = 2;
const PASSWORD_MIN: usize = 8;
const CAPTION_MIN: usize = 5;
const CAPTION_MAX: usize = 2200;
const LOCATION_MIN: usize = 2;
const LOCATION_MAX: usize = 100;
const COMMENT_MAX: usize = 2200;

/// Image bytes headed for the object store.
#[derive(Debug, Clone)]
pub struct ImageUpload {
  pub filename: String,
  pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
  pub name: String,
  pub username: String,
  pub email: String,
  pub password: String,
}

impl NewUser {
  pub fn validate(&self) -> Result<()> {
    if self.name.chars().count() < NAME_MIN {
      return Err(Error::Validation("name is too short".to_string()));
    }
    if self.username.chars().count() < USERNAME_MIN {
      return Err(Error::Validation("username is too short".to_string()));
    }
    validate_email(&self.email)?;
    validate_password(&self.password)
  }
}

#[derive(Debug, Clone)]
pub struct NewPost {
  pub creator_id: String,
  pub caption: String,
  pub image: ImageUpload,
  pub location: String,
  /// Comma-separated tags; spaces are stripped before splitting
  pub tags: String,
}

impl NewPost {
  pub fn validate(&self) -> Result<()> {
    validate_caption(&self.caption)?;
    validate_location(&self.location)
  }
}

#[derive(Debug, Clone)]
pub struct UpdatePost {
  pub post_id: String,
  pub caption: String,
  pub image_url: String,
  pub image_id: String,
  pub location: String,
  pub tags: String,
  /// Replacement image, if the user picked a new file
  pub new_image: Option<ImageUpload>,
}

impl UpdatePost {
  pub fn validate(&self) -> Result<()> {
    validate_caption(&self.caption)?;
    validate_location(&self.location)
  }
}

#[derive(Debug, Clone)]
pub struct NewComment {
  pub text: String,
}

impl NewComment {
  pub fn validate(&self) -> Result<()> {
    let len = self.text.chars().count();
    if len == 0 {
      return Err(Error::Validation("comment is empty".to_string()));
    }
    if len > COMMENT_MAX {
      return Err(Error::Validation("comment is too long".to_string()));
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct UpdateUser {
  pub user_id: String,
  pub name: String,
  pub bio: String,
  pub image_url: String,
  pub image_id: String,
  pub new_image: Option<ImageUpload>,
}

impl UpdateUser {
  pub fn validate(&self) -> Result<()> {
    if self.name.chars().count() < NAME_MIN {
      return Err(Error::Validation("name is too short".to_string()));
    }
    Ok(())
  }
}

pub(crate) fn validate_email(email: &str) -> Result<()> {
  if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
    return Err(Error::Validation("invalid email address".to_string()));
  }
  Ok(())
}

pub(crate) fn validate_password(password: &str) -> Result<()> {
  if password.chars().count() < PASSWORD_MIN {
    return Err(Error::Validation(format!(
      "password must be at least {} characters",
      PASSWORD_MIN
    )));
  }
  Ok(())
}

fn validate_caption(caption: &str) -> Result<()> {
  let len = caption.chars().count();
  if !(CAPTION_MIN..=CAPTION_MAX).contains(&len) {
    return Err(Error::Validation(format!(
      "caption must be {}-{} characters",
      CAPTION_MIN, CAPTION_MAX
    )));
  }
  Ok(())
}

fn validate_location(location: &str) -> Result<()> {
  let len = location.chars().count();
  if !(LOCATION_MIN..=LOCATION_MAX).contains(&len) {
    return Err(Error::Validation(format!(
      "location must be {}-{} characters",
      LOCATION_MIN, LOCATION_MAX
    )));
  }
  Ok(())
}

/// Split a comma-separated tag string, stripping all spaces first.
pub fn split_tags(tags: &str) -> Vec<String> {
  tags
    .replace(' ', "")
    .split(',')
    .filter(|t| !t.is_empty())
    .map(String::from)
    .collect()
}

/// Toggle an identity in a like list: remove it if present, append otherwise.
/// Applying twice restores the original list.
pub fn toggle_like(likes: &[String], user_id: &str) -> Vec<String> {
  if is_liked(likes, user_id) {
    likes.iter().filter(|id| *id != user_id).cloned().collect()
  } else {
    let mut out = likes.to_vec();
    out.push(user_id.to_string());
    out
  }
}

pub fn is_liked(likes: &[String], user_id: &str) -> bool {
  likes.iter().any(|id| id == user_id)
}

/// Wire payload for a post document.
pub(crate) fn post_fields(
  creator_id: &str,
  caption: &str,
  image_url: &str,
  image_id: &str,
  location: &str,
  tags: &[String],
) -> Value {
  serde_json::json!({
    "creator": creator_id,
    "caption": caption,
    "imageUrl": image_url,
    "imageId": image_id,
    "location": location,
    "tags": tags,
  })
}
