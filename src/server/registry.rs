//! Keyed registries for tools, prompts and resources.
//!
//! Entries live in a concurrent map; list operations take a snapshot sorted
//! lexicographically by key and paginate it with opaque cursors. A cursor is
//! the base64 of the last key returned; the next page starts at the first
//! key strictly greater than it.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use tokio::sync::Mutex;

/// One page of entries plus the cursor for the next page, if any.
#[derive(Debug)]
pub struct Page<E> {
    pub entries: Vec<E>,
    pub next_cursor: Option<String>,
}

/// A concurrent registry keyed by name or URI.
pub struct Registry<E> {
    entries: DashMap<String, E>,
    /// Serializes mutation + list_changed emission so the notification is
    /// always sent after the mutation is visible.
    mutation: Mutex<()>,
}

impl<E: Clone> Registry<E> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            mutation: Mutex::new(()),
        }
    }

    /// Inserts or replaces the entry under `key`, running `after` (typically
    /// the list_changed emission) before any other mutation can interleave.
    pub async fn register<F, Fut>(&self, key: String, entry: E, after: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let _guard = self.mutation.lock().await;
        self.entries.insert(key, entry);
        after().await;
    }

    /// Removes the entry under `key`; `after` runs only if something was
    /// actually removed.
    pub async fn deregister<F, Fut>(&self, key: &str, after: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let _guard = self.mutation.lock().await;
        let removed = self.entries.remove(key).is_some();
        if removed {
            after().await;
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<E> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries sorted lexicographically by key.
    fn sorted(&self) -> Vec<(String, E)> {
        let mut snapshot: Vec<(String, E)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    /// One page of the sorted snapshot.
    ///
    /// Without a limit the whole snapshot is returned and `next_cursor` is
    /// always absent. With a limit, at most `limit` entries are returned and
    /// `next_cursor` is present iff the page filled to the limit.
    pub fn page(&self, cursor: Option<&str>, limit: Option<usize>) -> ProtocolResult<Page<E>> {
        let after_key = cursor.map(decode_cursor).transpose()?;
        let sorted = self.sorted();

        let start = match &after_key {
            Some(last) => sorted.partition_point(|(key, _)| key.as_str() <= last.as_str()),
            None => 0,
        };
        let remaining = &sorted[start..];

        let Some(limit) = limit else {
            return Ok(Page {
                entries: remaining.iter().map(|(_, e)| e.clone()).collect(),
                next_cursor: None,
            });
        };

        let page: Vec<_> = remaining.iter().take(limit).collect();
        let next_cursor = if page.len() == limit && limit > 0 {
            page.last().map(|(key, _)| encode_cursor(key))
        } else {
            None
        };

        Ok(Page {
            entries: page.into_iter().map(|(_, e)| e.clone()).collect(),
            next_cursor,
        })
    }
}

impl<E: Clone> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_cursor(key: &str) -> String {
    BASE64.encode(key)
}

fn decode_cursor(cursor: &str) -> ProtocolResult<String> {
    let bytes = BASE64
        .decode(cursor)
        .map_err(|_| ProtocolError::InvalidCursor)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidCursor)
}
