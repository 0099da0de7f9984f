//! The active-set index: business key → fingerprint and row id of the
//! currently active version. Rebuilt from the store at the start of every run
//! and discarded at its end.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{hash::ContentHash, record::BusinessKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEntry {
  pub content_hash: ContentHash,
  pub record_id:    Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveIndex {
  entries: HashMap<BusinessKey, ActiveEntry>,
}

impl ActiveIndex {
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, key: BusinessKey, entry: ActiveEntry) {
    self.entries.insert(key, entry);
  }

  pub fn get(&self, key: &BusinessKey) -> Option<&ActiveEntry> {
    self.entries.get(key)
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = (&BusinessKey, &ActiveEntry)> {
    self.entries.iter()
  }
}

impl FromIterator<(BusinessKey, ActiveEntry)> for ActiveIndex {
  fn from_iter<I: IntoIterator<Item = (BusinessKey, ActiveEntry)>>(
    iter: I,
  ) -> Self {
    Self { entries: iter.into_iter().collect() }
  }
}
