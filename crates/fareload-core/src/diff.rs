//! The differ: incoming batch → classified changes against the active set.
//!
//! Every incoming key becomes exactly one of insert, update or unchanged; every
//! active key absent from the batch becomes exactly one delete. Classification
//! is a single pass of hash lookups over the batch plus one pass over the
//! index.

use std::collections::HashSet;

use uuid::Uuid;

use crate::{
  batch::HashedRecord,
  index::ActiveIndex,
  load::{ChangeCounts, LoadType, change_percentage},
  record::BusinessKey,
};

/// The outcome for a single business key.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
  /// No active version exists; write one.
  Insert(HashedRecord),
  /// The active version `previous` differs; close it and write `record`.
  Update {
    previous: Uuid,
    record:   HashedRecord,
  },
  /// The active version `record_id` already matches. No write.
  Unchanged {
    record_id: Uuid,
    record:    HashedRecord,
  },
  /// The key is active but absent from the batch; close it.
  Delete { key: BusinessKey, record_id: Uuid },
}

impl Change {
  pub fn key(&self) -> &BusinessKey {
    match self {
      Self::Insert(r)
      | Self::Update { record: r, .. }
      | Self::Unchanged { record: r, .. } => &r.key,
      Self::Delete { key, .. } => key,
    }
  }
}

/// The classified changes of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
  pub load_type:       LoadType,
  /// Size of the active set the batch was classified against.
  pub previous_active: usize,
  /// Incoming keys in batch order, then deletes ordered by key.
  pub changes:         Vec<Change>,
}

impl ChangeSet {
  pub fn counts(&self) -> ChangeCounts {
    let mut counts = ChangeCounts::default();
    for change in &self.changes {
      match change {
        Change::Insert(_) => counts.inserted += 1,
        Change::Update { .. } => counts.updated += 1,
        Change::Unchanged { .. } => counts.unchanged += 1,
        Change::Delete { .. } => counts.deleted += 1,
      }
    }
    counts
  }

  /// The change percentage this set would record if applied as is.
  pub fn projected_change_percentage(&self) -> f64 {
    let counts = self.counts();
    change_percentage(
      counts.inserted,
      counts.deleted,
      self.previous_active as u64,
    )
  }

  pub fn is_noop(&self) -> bool {
    self
      .changes
      .iter()
      .all(|c| matches!(c, Change::Unchanged { .. }))
  }

  /// Rewrite an incremental classification as a full reload: every active
  /// version is closed and every incoming record written afresh. The result is
  /// identical to classifying the same batch with [`LoadType::Full`].
  pub fn escalate_to_full(self) -> Self {
    let mut incoming = Vec::with_capacity(self.changes.len());
    let mut deletes = Vec::new();

    for change in self.changes {
      match change {
        Change::Insert(record) => incoming.push(Change::Insert(record)),
        Change::Update { previous, record } => {
          deletes.push(Change::Delete {
            key:       record.key.clone(),
            record_id: previous,
          });
          incoming.push(Change::Insert(record));
        }
        Change::Unchanged { record_id, record } => {
          deletes.push(Change::Delete {
            key: record.key.clone(),
            record_id,
          });
          incoming.push(Change::Insert(record));
        }
        delete @ Change::Delete { .. } => deletes.push(delete),
      }
    }

    deletes.sort_by(|a, b| a.key().cmp(b.key()));
    incoming.extend(deletes);

    Self {
      load_type:       LoadType::Full,
      previous_active: self.previous_active,
      changes:         incoming,
    }
  }
}

/// Classify `records` against `active`.
///
/// `records` must already be de-duplicated by key (see
/// [`crate::batch::prepare`]).
pub fn diff(
  records: Vec<HashedRecord>,
  active: &ActiveIndex,
  load_type: LoadType,
) -> ChangeSet {
  let mut seen: HashSet<BusinessKey> = HashSet::with_capacity(records.len());
  let mut changes = Vec::with_capacity(records.len() + active.len());

  for record in records {
    seen.insert(record.key.clone());

    let change = match (load_type, active.get(&record.key)) {
      (LoadType::Full, _) | (LoadType::Incremental, None) => {
        Change::Insert(record)
      }
      (LoadType::Incremental, Some(entry)) if entry.content_hash == record.hash => {
        Change::Unchanged {
          record_id: entry.record_id,
          record,
        }
      }
      (LoadType::Incremental, Some(entry)) => Change::Update {
        previous: entry.record_id,
        record,
      },
    };
    changes.push(change);
  }

  // A full reload closes every active version, including the ones whose key
  // comes back in the batch.
  let mut deletes: Vec<Change> = active
    .iter()
    .filter(|(key, _)| load_type == LoadType::Full || !seen.contains(*key))
    .map(|(key, entry)| Change::Delete {
      key:       key.clone(),
      record_id: entry.record_id,
    })
    .collect();
  deletes.sort_by(|a, b| a.key().cmp(b.key()));
  changes.extend(deletes);

  ChangeSet {
    load_type,
    previous_active: active.len(),
    changes,
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::{index::ActiveEntry, testutil::hashed};

  fn index_of(records: &[HashedRecord]) -> ActiveIndex {
    records
      .iter()
      .map(|r| {
        (r.key.clone(), ActiveEntry {
          content_hash: r.hash.clone(),
          record_id:    Uuid::new_v4(),
        })
      })
      .collect()
  }

  #[test]
  fn classifies_every_kind_of_change() {
    let active = index_of(&[hashed(1, 100.0), hashed(2, 200.0), hashed(3, 300.0)]);
    let incoming = vec![hashed(1, 100.0), hashed(2, 250.0), hashed(4, 400.0)];

    let set = diff(incoming, &active, LoadType::Incremental);

    assert_eq!(set.counts(), ChangeCounts {
      inserted:  1,
      updated:   1,
      deleted:   1,
      unchanged: 1,
    });
    assert_eq!(set.previous_active, 3);

    let update = set
      .changes
      .iter()
      .find_map(|c| match c {
        Change::Update { previous, record } => Some((previous, record)),
        _ => None,
      })
      .unwrap();
    assert_eq!(
      Some(*update.0),
      active.get(&update.1.key).map(|e| e.record_id)
    );

    let Some(Change::Delete { key, .. }) = set.changes.last() else {
      panic!("deletes come last");
    };
    assert_eq!(key, &hashed(3, 300.0).key);
  }

  #[test]
  fn every_key_lands_in_exactly_one_class() {
    let active_records: Vec<_> = (0..20).map(|n| hashed(n, 100.0)).collect();
    let active = index_of(&active_records);
    // Keys 10..30: half overlap, every other overlapping one changed.
    let incoming: Vec<_> = (10..30)
      .map(|n| hashed(n, if n % 2 == 0 { 100.0 } else { 999.0 }))
      .collect();
    let incoming_keys: Vec<_> = incoming.iter().map(|r| r.key.clone()).collect();

    let set = diff(incoming, &active, LoadType::Incremental);

    let mut classes: HashMap<&BusinessKey, usize> = HashMap::new();
    for change in &set.changes {
      *classes.entry(change.key()).or_default() += 1;
    }
    assert!(classes.values().all(|&n| n == 1));
    for key in &incoming_keys {
      assert!(classes.contains_key(key));
    }
    for (key, _) in active.iter() {
      assert!(classes.contains_key(key));
    }

    let counts = set.counts();
    assert_eq!(counts.inserted + counts.updated + counts.unchanged, 20);
    assert_eq!(counts.deleted, 10);
    assert_eq!(counts.updated, 5);
    assert_eq!(set.projected_change_percentage(), 100.0);
  }

  #[test]
  fn same_batch_against_its_own_result_is_a_noop() {
    let batch: Vec<_> = (0..5).map(|n| hashed(n, 10.0 * n as f64 + 1.0)).collect();
    let active = index_of(&batch);

    let set = diff(batch, &active, LoadType::Incremental);

    assert!(set.is_noop());
    assert_eq!(set.counts().unchanged, 5);
    assert_eq!(set.projected_change_percentage(), 0.0);
  }

  #[test]
  fn full_load_closes_everything_and_inserts_everything() {
    let active = index_of(&[hashed(1, 100.0), hashed(2, 200.0)]);
    let incoming = vec![hashed(1, 100.0), hashed(3, 300.0)];

    let set = diff(incoming, &active, LoadType::Full);

    assert_eq!(set.counts(), ChangeCounts {
      inserted:  2,
      updated:   0,
      deleted:   2,
      unchanged: 0,
    });
  }

  #[test]
  fn escalation_matches_a_full_classification() {
    let active = index_of(&[hashed(1, 100.0), hashed(2, 200.0), hashed(3, 300.0)]);
    let incoming = vec![hashed(1, 100.0), hashed(2, 250.0), hashed(4, 400.0)];

    let escalated =
      diff(incoming.clone(), &active, LoadType::Incremental).escalate_to_full();
    let full = diff(incoming, &active, LoadType::Full);

    assert_eq!(escalated, full);
  }

  #[test]
  fn empty_store_inserts_everything() {
    let set = diff(vec![hashed(1, 1.0)], &ActiveIndex::new(), LoadType::Incremental);
    assert_eq!(set.counts().inserted, 1);
    assert_eq!(set.previous_active, 0);
    assert_eq!(set.projected_change_percentage(), 100.0);
  }
}
