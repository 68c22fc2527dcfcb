//! Typed resource operations over the platform ports.
//!
//! Records are validated struct definitions built at the store boundary;
//! inputs are validated before any network call is made.

mod client;
mod types;

pub use client::{ApiClient, POSTS_PAGE_SIZE, RECENT_POSTS_LIMIT};
pub use types::{
  is_liked, split_tags, toggle_like, CommentRecord, ImageUpload, NewComment, NewPost, NewUser,
  PostRecord, SavedRecord, Session, UpdatePost, UpdateUser, UserRecord,
};
