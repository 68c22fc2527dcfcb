//! Typed cache keys and invalidation patterns.

/// Resource-type tag: the namespace half of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceTag {
  RecentPosts,
  Post,
  PostPages,
  PostSearch,
  Comments,
  CurrentUser,
  User,
  Users,
  Saves,
}

/// Cache key for a query. Two keys are equal iff the resource tag and the
/// discriminating parameters match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
  /// Recent posts listing
  RecentPosts,
  /// A single post by id
  PostById(String),
  /// The accumulated paginated feed
  PostPages,
  /// Caption search results for a term
  SearchPosts(String),
  /// Comments for one post
  Comments(String),
  /// The signed-in user's profile
  CurrentUser,
  /// A single user by id
  UserById(String),
  /// The user directory listing
  Users,
  /// Saved-post records for one user
  SavedPosts(String),
}

impl ResourceKey {
  /// Build a search key with the term normalized (trimmed, lowercased) so
  /// case variants of one search share an entry.
  pub fn search(term: &str) -> Self {
    ResourceKey::SearchPosts(term.trim().to_lowercase())
  }

  pub fn tag(&self) -> ResourceTag {
    match self {
      Self::RecentPosts => ResourceTag::RecentPosts,
      Self::PostById(_) => ResourceTag::Post,
      Self::PostPages => ResourceTag::PostPages,
      Self::SearchPosts(_) => ResourceTag::PostSearch,
      Self::Comments(_) => ResourceTag::Comments,
      Self::CurrentUser => ResourceTag::CurrentUser,
      Self::UserById(_) => ResourceTag::User,
      Self::Users => ResourceTag::Users,
      Self::SavedPosts(_) => ResourceTag::Saves,
    }
  }

  /// Human-readable form for log output.
  pub fn description(&self) -> String {
    match self {
      Self::RecentPosts => "recent posts".to_string(),
      Self::PostById(id) => format!("post {}", id),
      Self::PostPages => "post pages".to_string(),
      Self::SearchPosts(term) => format!("post search '{}'", term),
      Self::Comments(post_id) => format!("comments for post {}", post_id),
      Self::CurrentUser => "current user".to_string(),
      Self::UserById(id) => format!("user {}", id),
      Self::Users => "users".to_string(),
      Self::SavedPosts(user_id) => format!("saves for user {}", user_id),
    }
  }
}

/// What a mutation invalidates: one exact key, or every key of a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
  Exact(ResourceKey),
  Namespace(ResourceTag),
}

impl KeyPattern {
  pub fn matches(&self, key: &ResourceKey) -> bool {
    match self {
      Self::Exact(k) => k == key,
      Self::Namespace(tag) => key.tag() == *tag,
    }
  }
}
