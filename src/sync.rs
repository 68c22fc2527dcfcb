//! Cached client: queries through the cache, mutations through the executor.
//!
//! This is the surface the rest of an application talks to. Reads go through
//! [`QueryCache::fetch`] under a typed key so repeated and concurrent reads
//! of the same resource share one remote call; writes go through the
//! [`MutationExecutor`] with the exact set of keys each write makes stale.

use tracing::{debug, warn};

use crate::api::{
  ApiClient, CommentRecord, NewComment, NewPost, NewUser, PostRecord, SavedRecord, UpdatePost,
  UpdateUser, UserRecord, POSTS_PAGE_SIZE,
};
use crate::cache::{KeyPattern, QueryCache, ResourceKey, ResourceTag, Subscription};
use crate::error::Result;
use crate::mutation::MutationExecutor;
use crate::pager::InfiniteListCursor;
use crate::platform::{AuthSession, Platform};

pub struct SyncClient<P> {
  api: ApiClient<P>,
  cache: QueryCache,
  mutations: MutationExecutor,
}

impl<P> Clone for SyncClient<P> {
  fn clone(&self) -> Self {
    Self {
      api: self.api.clone(),
      cache: self.cache.clone(),
      mutations: self.mutations.clone(),
    }
  }
}

impl<P: Platform + 'static> SyncClient<P> {
  pub fn new(api: ApiClient<P>) -> Self {
    Self::with_cache(api, QueryCache::new())
  }

  pub fn with_cache(api: ApiClient<P>, cache: QueryCache) -> Self {
    let mutations = MutationExecutor::new(cache.clone());
    Self {
      api,
      cache,
      mutations,
    }
  }

  pub fn api(&self) -> &ApiClient<P> {
    &self.api
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Change notifications for one cached resource.
  pub fn subscribe(&self, key: ResourceKey) -> Subscription {
    self.cache.subscribe(key)
  }

  // ==========================================================================
  // Auth (uncached pass-through; the session gate owns this state)
  // ==========================================================================

  pub async fn create_user_account(&self, user: &NewUser) -> Result<UserRecord> {
    self.api.create_user_account(user).await
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
    self.api.sign_in(email, password).await
  }

  pub async fn sign_out(&self) -> Result<()> {
    self.api.sign_out().await
  }

  // ==========================================================================
  // Cached queries
  // ==========================================================================

  pub async fn recent_posts(&self) -> Result<Vec<PostRecord>> {
    let api = self.api.clone();
    self
      .cache
      .fetch(ResourceKey::RecentPosts, move || {
        let api = api.clone();
        async move { api.get_recent_posts().await }
      })
      .await
  }

  pub async fn post_by_id(&self, post_id: &str) -> Result<PostRecord> {
    let api = self.api.clone();
    let id = post_id.to_string();
    self
      .cache
      .fetch(ResourceKey::PostById(id.clone()), move || {
        let api = api.clone();
        let id = id.clone();
        async move { api.get_post_by_id(&id).await }
      })
      .await
  }

  /// Search results are keyed by the normalized term, so case and whitespace
  /// variants of one search share an entry.
  pub async fn search_posts(&self, term: &str) -> Result<Vec<PostRecord>> {
    let api = self.api.clone();
    let term = term.to_string();
    self
      .cache
      .fetch(ResourceKey::search(&term), move || {
        let api = api.clone();
        let term = term.clone();
        async move { api.search_posts(&term).await }
      })
      .await
  }

  pub async fn comments(&self, post_id: &str) -> Result<Vec<CommentRecord>> {
    let api = self.api.clone();
    let id = post_id.to_string();
    self
      .cache
      .fetch(ResourceKey::Comments(id.clone()), move || {
        let api = api.clone();
        let id = id.clone();
        async move { api.get_comments(&id).await }
      })
      .await
  }

  pub async fn current_user(&self) -> Result<UserRecord> {
    let api = self.api.clone();
    self
      .cache
      .fetch(ResourceKey::CurrentUser, move || {
        let api = api.clone();
        async move { api.get_current_user().await }
      })
      .await
  }

  pub async fn user_by_id(&self, user_id: &str) -> Result<UserRecord> {
    let api = self.api.clone();
    let id = user_id.to_string();
    self
      .cache
      .fetch(ResourceKey::UserById(id.clone()), move || {
        let api = api.clone();
        let id = id.clone();
        async move { api.get_user_by_id(&id).await }
      })
      .await
  }

  pub async fn users(&self, limit: Option<usize>) -> Result<Vec<UserRecord>> {
    let api = self.api.clone();
    self
      .cache
      .fetch(ResourceKey::Users, move || {
        let api = api.clone();
        async move { api.get_users(limit).await }
      })
      .await
  }

  pub async fn saved_posts(&self, user_id: &str) -> Result<Vec<SavedRecord>> {
    let api = self.api.clone();
    let id = user_id.to_string();
    self
      .cache
      .fetch(ResourceKey::SavedPosts(id.clone()), move || {
        let api = api.clone();
        let id = id.clone();
        async move { api.get_saved_posts(&id).await }
      })
      .await
  }

  // ==========================================================================
  // Paginated feed
  // ==========================================================================

  pub fn posts_cursor(&self) -> InfiniteListCursor<PostRecord> {
    InfiniteListCursor::new(POSTS_PAGE_SIZE)
  }

  /// Fetch the next feed page into the cursor. Page 1 goes through the cache
  /// so concurrent first-page loads coalesce; afterwards the accumulated feed
  /// is stored under the feed key together with a loader that rebuilds every
  /// accumulated page, so an invalidation-driven refetch reproduces the whole
  /// feed instead of truncating it to page 1.
  pub async fn load_next_posts(&self, cursor: &mut InfiniteListCursor<PostRecord>) -> Result<usize> {
    let received = cursor
      .fetch_next(|page| {
        let api = self.api.clone();
        let cache = self.cache.clone();
        async move {
          if page == 1 {
            cache
              .fetch(ResourceKey::PostPages, move || {
                let api = api.clone();
                async move { api.get_posts_page(1).await }
              })
              .await
          } else {
            api.get_posts_page(page).await
          }
        }
      })
      .await?;

    let pages = cursor.page_count();
    if pages > 1 {
      let items: Vec<PostRecord> = cursor.items().cloned().collect();
      let api = self.api.clone();
      self
        .cache
        .put_with_loader(&ResourceKey::PostPages, &items, move || {
          let api = api.clone();
          async move { reload_feed_pages(&api, pages).await }
        })?;
    }
    Ok(received)
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub async fn create_post(&self, post: &NewPost) -> Result<PostRecord> {
    self
      .mutations
      .execute(
        self.api.create_post(post),
        &[KeyPattern::Exact(ResourceKey::RecentPosts)],
      )
      .await
  }

  pub async fn update_post(&self, update: &UpdatePost) -> Result<PostRecord> {
    self
      .mutations
      .execute(
        self.api.update_post(update),
        &[KeyPattern::Exact(ResourceKey::PostById(
          update.post_id.clone(),
        ))],
      )
      .await
  }

  pub async fn delete_post(&self, post_id: &str, image_id: &str) -> Result<()> {
    self
      .mutations
      .execute(
        self.api.delete_post(post_id, image_id),
        &[KeyPattern::Exact(ResourceKey::RecentPosts)],
      )
      .await
  }

  /// Replace a post's like list and invalidate every listing that renders it.
  pub async fn like_post(&self, post_id: &str, likes: &[String]) -> Result<PostRecord> {
    self
      .mutations
      .execute(
        self.api.like_post(post_id, likes),
        &[
          KeyPattern::Exact(ResourceKey::PostById(post_id.to_string())),
          KeyPattern::Exact(ResourceKey::RecentPosts),
          KeyPattern::Exact(ResourceKey::PostPages),
          KeyPattern::Exact(ResourceKey::CurrentUser),
        ],
      )
      .await
  }

  /// Optimistic like toggle: the flipped like list is written into the cache
  /// before the remote call, and is deliberately left in place if the call
  /// fails. A later fetch of the post reconverges on the stored state.
  pub async fn toggle_like(
    &self,
    post: &PostRecord,
    user_id: &str,
  ) -> (Vec<String>, Result<PostRecord>) {
    let likes = crate::api::toggle_like(&post.likes, user_id);

    let mut optimistic = post.clone();
    optimistic.likes = likes.clone();
    if let Err(e) = self
      .cache
      .put(&ResourceKey::PostById(post.id.clone()), &optimistic)
    {
      warn!(post_id = %post.id, error = %e, "failed to store optimistic like state");
    }

    let result = self.like_post(&post.id, &likes).await;
    if result.is_err() {
      debug!(post_id = %post.id, "like write failed; optimistic state left in place");
    }
    (likes, result)
  }

  pub async fn save_post(&self, user_id: &str, post_id: &str) -> Result<SavedRecord> {
    self
      .mutations
      .execute(
        self.api.save_post(user_id, post_id),
        &[
          KeyPattern::Exact(ResourceKey::RecentPosts),
          KeyPattern::Exact(ResourceKey::PostPages),
          KeyPattern::Exact(ResourceKey::CurrentUser),
          KeyPattern::Exact(ResourceKey::SavedPosts(user_id.to_string())),
        ],
      )
      .await
  }

  pub async fn unsave_post(&self, user_id: &str, saved_id: &str) -> Result<()> {
    self
      .mutations
      .execute(
        self.api.delete_saved_post(saved_id),
        &[
          KeyPattern::Exact(ResourceKey::RecentPosts),
          KeyPattern::Exact(ResourceKey::PostPages),
          KeyPattern::Exact(ResourceKey::CurrentUser),
          KeyPattern::Exact(ResourceKey::SavedPosts(user_id.to_string())),
        ],
      )
      .await
  }

  pub async fn add_comment(
    &self,
    post_id: &str,
    author_id: &str,
    comment: &NewComment,
  ) -> Result<CommentRecord> {
    self
      .mutations
      .execute(
        self.api.add_comment(post_id, author_id, comment),
        &[KeyPattern::Exact(ResourceKey::Comments(post_id.to_string()))],
      )
      .await
  }

  /// A deleted comment's post is not known here, so the whole comment
  /// namespace goes stale rather than one key.
  pub async fn delete_comment(&self, comment_id: &str) -> Result<()> {
    self
      .mutations
      .execute(
        self.api.delete_comment(comment_id),
        &[KeyPattern::Namespace(ResourceTag::Comments)],
      )
      .await
  }

  pub async fn update_user(&self, update: &UpdateUser) -> Result<UserRecord> {
    self
      .mutations
      .execute(
        self.api.update_user(update),
        &[
          KeyPattern::Exact(ResourceKey::CurrentUser),
          KeyPattern::Exact(ResourceKey::UserById(update.user_id.clone())),
        ],
      )
      .await
  }
}

/// Re-fetch an assembled feed of up to `pages` pages, stopping early if the
/// feed ends sooner.
async fn reload_feed_pages<P: Platform>(
  api: &ApiClient<P>,
  pages: usize,
) -> Result<Vec<PostRecord>> {
  let mut all = Vec::new();
  for page in 1..=pages {
    let batch = api.get_posts_page(page).await?;
    let short = batch.len() < POSTS_PAGE_SIZE;
    all.extend(batch);
    if short {
      break;
    }
  }
  Ok(all)
}
