use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scc::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store transport error: {0}")]
  Transport(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Keyed-store capability shared by every bridge component.
///
/// Values are opaque strings (JSON blobs on every current call site). Keys
/// may carry a TTL; expiry is observable on the next read. `push_trim` is a
/// single atomic unit so a trim is never lost under concurrent writers.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
  /// Read a plain value. Expired keys read as absent.
  async fn get(&self, key: &str) -> StoreResult<Option<String>>;

  /// Write a plain value, replacing whatever was at the key.
  async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

  /// Remove a key. Returns whether a live value was present.
  async fn delete(&self, key: &str) -> StoreResult<bool>;

  /// Read and remove in one step (single-use values).
  async fn take(&self, key: &str) -> StoreResult<Option<String>>;

  /// Append to a list and trim it to the last `max` entries, atomically.
  async fn push_trim(&self, key: &str, value: String, max: usize) -> StoreResult<()>;

  /// The last `limit` list entries, oldest first.
  async fn list_tail(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;

  /// Add a member to a set.
  async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

  /// Remove a member from a set.
  async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

  /// All members of a set, in sorted order.
  async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
}

#[derive(Clone)]
enum Value {
  Str(String),
  List(VecDeque<String>),
  Set(BTreeSet<String>),
}

#[derive(Clone)]
struct Entry {
  value: Value,
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_expired(&self) -> bool {
    self.expires_at.is_some_and(|at| Instant::now() >= at)
  }
}

/// In-memory implementation of the keyed store.
pub struct MemoryStore {
  entries: HashMap<String, Entry>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  /// Drop an entry whose TTL has lapsed; expiry is lazy, on access.
  async fn evict_if_expired(&self, key: &str) -> bool {
    let expired = self
      .entries
      .read_async(key, |_, entry| entry.is_expired())
      .await
      .unwrap_or(false);
    if expired {
      let _ = self.entries.remove_async(key).await;
    }
    expired
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
  async fn get(&self, key: &str) -> StoreResult<Option<String>> {
    if self.evict_if_expired(key).await {
      return Ok(None);
    }
    let value = self
      .entries
      .read_async(key, |_, entry| match &entry.value {
        Value::Str(s) => Some(s.clone()),
        _ => None,
      })
      .await
      .flatten();
    Ok(value)
  }

  async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
    let entry = Entry {
      value: Value::Str(value),
      expires_at: ttl.map(|d| Instant::now() + d),
    };
    loop {
      let replaced = self
        .entries
        .update_async(key, |_, existing| *existing = entry.clone())
        .await;
      if replaced.is_some() {
        return Ok(());
      }
      match self.entries.insert_async(key.to_string(), entry.clone()).await {
        Ok(()) => return Ok(()),
        // Raced with a concurrent insert; retry as an update.
        Err(_) => continue,
      }
    }
  }

  async fn delete(&self, key: &str) -> StoreResult<bool> {
    let expired = self.evict_if_expired(key).await;
    let removed = self.entries.remove_async(key).await.is_some();
    Ok(removed && !expired)
  }

  async fn take(&self, key: &str) -> StoreResult<Option<String>> {
    let taken = self.entries.remove_async(key).await;
    let value = match taken {
      Some((_, entry)) if !entry.is_expired() => match entry.value {
        Value::Str(s) => Some(s),
        _ => None,
      },
      _ => None,
    };
    Ok(value)
  }

  async fn push_trim(&self, key: &str, value: String, max: usize) -> StoreResult<()> {
    loop {
      let pushed = self
        .entries
        .update_async(key, |_, entry| {
          let items = match &mut entry.value {
            Value::List(items) => items,
            // A non-list value at the key is replaced, as a list overwrite would.
            other => {
              *other = Value::List(VecDeque::new());
              match other {
                Value::List(items) => items,
                _ => unreachable!(),
              }
            }
          };
          items.push_back(value.clone());
          while items.len() > max {
            items.pop_front();
          }
        })
        .await;
      if pushed.is_some() {
        return Ok(());
      }
      let entry = Entry {
        value: Value::List(VecDeque::from([value.clone()])),
        expires_at: None,
      };
      match self.entries.insert_async(key.to_string(), entry).await {
        Ok(()) => return Ok(()),
        Err(_) => continue,
      }
    }
  }

  async fn list_tail(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
    let tail = self
      .entries
      .read_async(key, |_, entry| match &entry.value {
        Value::List(items) => {
          let skip = items.len().saturating_sub(limit);
          items.iter().skip(skip).cloned().collect()
        }
        _ => Vec::new(),
      })
      .await
      .unwrap_or_default();
    Ok(tail)
  }

  async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
    loop {
      let added = self
        .entries
        .update_async(key, |_, entry| {
          let members = match &mut entry.value {
            Value::Set(members) => members,
            other => {
              *other = Value::Set(BTreeSet::new());
              match other {
                Value::Set(members) => members,
                _ => unreachable!(),
              }
            }
          };
          members.insert(member.to_string());
        })
        .await;
      if added.is_some() {
        return Ok(());
      }
      let entry = Entry {
        value: Value::Set(BTreeSet::from([member.to_string()])),
        expires_at: None,
      };
      match self.entries.insert_async(key.to_string(), entry).await {
        Ok(()) => return Ok(()),
        Err(_) => continue,
      }
    }
  }

  async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
    self
      .entries
      .update_async(key, |_, entry| {
        if let Value::Set(members) = &mut entry.value {
          members.remove(member);
        }
      })
      .await;
    Ok(())
  }

  async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
    let members = self
      .entries
      .read_async(key, |_, entry| match &entry.value {
        Value::Set(members) => members.iter().cloned().collect(),
        _ => Vec::new(),
      })
      .await
      .unwrap_or_default();
    Ok(members)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_put_get_delete() {
    let store = MemoryStore::new();

    store
      .put("key", "value".to_string(), None)
      .await
      .unwrap();
    assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));

    assert!(store.delete("key").await.unwrap());
    assert_eq!(store.get("key").await.unwrap(), None);
    assert!(!store.delete("key").await.unwrap());
  }

  #[tokio::test]
  async fn test_put_overwrites() {
    let store = MemoryStore::new();

    store.put("key", "old".to_string(), None).await.unwrap();
    store.put("key", "new".to_string(), None).await.unwrap();
    assert_eq!(store.get("key").await.unwrap(), Some("new".to_string()));
  }

  #[tokio::test]
  async fn test_ttl_expiry_observed_on_read() {
    let store = MemoryStore::new();

    store
      .put(
        "ephemeral",
        "value".to_string(),
        Some(Duration::from_millis(10)),
      )
      .await
      .unwrap();
    assert!(store.get("ephemeral").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.get("ephemeral").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_take_is_single_use() {
    let store = MemoryStore::new();

    store.put("code", "abc".to_string(), None).await.unwrap();
    assert_eq!(store.take("code").await.unwrap(), Some("abc".to_string()));
    assert_eq!(store.take("code").await.unwrap(), None);
    assert_eq!(store.get("code").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_push_trim_keeps_last_entries() {
    let store = MemoryStore::new();

    for i in 0..5 {
      store
        .push_trim("list", format!("entry-{i}"), 3)
        .await
        .unwrap();
    }

    let tail = store.list_tail("list", 10).await.unwrap();
    assert_eq!(tail, vec!["entry-2", "entry-3", "entry-4"]);
  }

  #[tokio::test]
  async fn test_list_tail_limits_from_the_end() {
    let store = MemoryStore::new();

    for i in 0..4 {
      store
        .push_trim("list", format!("entry-{i}"), 100)
        .await
        .unwrap();
    }

    let tail = store.list_tail("list", 2).await.unwrap();
    assert_eq!(tail, vec!["entry-2", "entry-3"]);
  }

  #[tokio::test]
  async fn test_set_membership() {
    let store = MemoryStore::new();

    store.set_add("sessions", "a").await.unwrap();
    store.set_add("sessions", "b").await.unwrap();
    store.set_add("sessions", "a").await.unwrap();
    assert_eq!(store.set_members("sessions").await.unwrap(), vec!["a", "b"]);

    store.set_remove("sessions", "a").await.unwrap();
    assert_eq!(store.set_members("sessions").await.unwrap(), vec!["b"]);
  }

  #[tokio::test]
  async fn test_missing_keys_read_empty() {
    let store = MemoryStore::new();

    assert_eq!(store.get("nope").await.unwrap(), None);
    assert!(store.list_tail("nope", 10).await.unwrap().is_empty());
    assert!(store.set_members("nope").await.unwrap().is_empty());
  }
}
