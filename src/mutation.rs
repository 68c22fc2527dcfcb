//! Mutation execution with cache invalidation.
//!
//! A mutation is a remote write plus the set of key patterns it makes stale.
//! Invalidation is applied strictly after the write's success has been
//! observed; a failed write invalidates nothing and its error reaches the
//! caller unchanged. There is no retry.

use std::future::Future;
use tracing::debug;

use crate::cache::{KeyPattern, QueryCache};
use crate::error::Result;

pub struct MutationExecutor {
  cache: QueryCache,
}

impl MutationExecutor {
  pub fn new(cache: QueryCache) -> Self {
    Self { cache }
  }

  /// Run the action; on success invalidate each pattern in order.
  pub async fn execute<T, Fut>(&self, action: Fut, invalidates: &[KeyPattern]) -> Result<T>
  where
    Fut: Future<Output = Result<T>>,
  {
    let value = action.await?;

    debug!(patterns = invalidates.len(), "mutation succeeded, invalidating");
    for pattern in invalidates {
      self.cache.invalidate(pattern);
    }

    Ok(value)
  }
}

impl Clone for MutationExecutor {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResourceKey;
  use crate::error::Error;

  #[tokio::test]
  async fn success_invalidates_every_pattern() {
    let cache = QueryCache::new();
    let executor = MutationExecutor::new(cache.clone());

    let _: i64 = cache
      .fetch(ResourceKey::RecentPosts, || async { Ok(1) })
      .await
      .unwrap();
    let _: i64 = cache
      .fetch(ResourceKey::CurrentUser, || async { Ok(2) })
      .await
      .unwrap();

    let result = executor
      .execute(
        async { Ok(()) },
        &[
          KeyPattern::Exact(ResourceKey::RecentPosts),
          KeyPattern::Exact(ResourceKey::CurrentUser),
        ],
      )
      .await;

    assert!(result.is_ok());
    assert!(!cache.is_fresh(&ResourceKey::RecentPosts));
    assert!(!cache.is_fresh(&ResourceKey::CurrentUser));
  }

  #[tokio::test]
  async fn failure_surfaces_unchanged_and_invalidates_nothing() {
    let cache = QueryCache::new();
    let executor = MutationExecutor::new(cache.clone());

    let _: i64 = cache
      .fetch(ResourceKey::RecentPosts, || async { Ok(1) })
      .await
      .unwrap();

    let result: Result<()> = executor
      .execute(
        async { Err(Error::Validation("caption too short".to_string())) },
        &[KeyPattern::Exact(ResourceKey::RecentPosts)],
      )
      .await;

    match result {
      Err(Error::Validation(msg)) => assert_eq!(msg, "caption too short"),
      other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(cache.is_fresh(&ResourceKey::RecentPosts));
  }
}
