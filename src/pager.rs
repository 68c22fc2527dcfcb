//! Page-cursor state for infinite feeds.
//!
//! Offset pagination against a fixed page size: the next page number is
//! derived from how many pages have been accumulated, not from a server
//! cursor token, so concurrent insertions can shift page boundaries. The
//! feed is exhausted once a fetched page comes back shorter than the page
//! size.

use std::future::Future;

/// Where the cursor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
  /// No page requested yet
  Idle,
  /// A page fetch is in flight
  Loading,
  /// At least one page has landed; more may follow
  Loaded,
  /// A short page ended the feed
  Exhausted,
}

#[derive(Debug)]
pub struct InfiniteListCursor<T> {
  pages: Vec<Vec<T>>,
  page_size: usize,
  state: CursorState,
}

impl<T> InfiniteListCursor<T> {
  pub fn new(page_size: usize) -> Self {
    debug_assert!(page_size > 0);
    Self {
      pages: Vec::new(),
      page_size,
      state: CursorState::Idle,
    }
  }

  pub fn state(&self) -> CursorState {
    self.state
  }

  pub fn is_exhausted(&self) -> bool {
    self.state == CursorState::Exhausted
  }

  pub fn is_loading(&self) -> bool {
    self.state == CursorState::Loading
  }

  /// Next page number to request (1-based), or None while loading or after
  /// exhaustion.
  pub fn next_page(&self) -> Option<usize> {
    match self.state {
      CursorState::Loading | CursorState::Exhausted => None,
      CursorState::Idle | CursorState::Loaded => Some(self.pages.len() + 1),
    }
  }

  /// Enter Loading and return the page number to fetch.
  pub fn begin_load(&mut self) -> Option<usize> {
    let page = self.next_page()?;
    self.state = CursorState::Loading;
    Some(page)
  }

  /// Record a fetched page. A page shorter than the page size exhausts the
  /// feed; otherwise the cursor stays fetchable.
  pub fn complete_page(&mut self, items: Vec<T>) {
    let short = items.len() < self.page_size;
    self.pages.push(items);
    self.state = if short {
      CursorState::Exhausted
    } else {
      CursorState::Loaded
    };
  }

  /// Abandon an in-flight load, returning to the previous fetchable state.
  pub fn fail_load(&mut self) {
    self.state = if self.pages.is_empty() {
      CursorState::Idle
    } else {
      CursorState::Loaded
    };
  }

  /// All accumulated items in page order.
  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flatten()
  }

  pub fn total_items(&self) -> usize {
    self.pages.iter().map(Vec::len).sum()
  }

  pub fn page_count(&self) -> usize {
    self.pages.len()
  }

  /// Drop all pages and start over from page 1.
  pub fn reset(&mut self) {
    self.pages.clear();
    self.state = CursorState::Idle;
  }

  /// Drive one transition: fetch the next page through `loader` and record
  /// it. Returns the number of items received, or 0 if there was nothing to
  /// fetch.
  pub async fn fetch_next<F, Fut, E>(&mut self, loader: F) -> Result<usize, E>
  where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
  {
    let Some(page) = self.begin_load() else {
      return Ok(0);
    };

    match loader(page).await {
      Ok(items) => {
        let received = items.len();
        self.complete_page(items);
        Ok(received)
      }
      Err(e) => {
        self.fail_load();
        Err(e)
      }
    }
  }
}
