// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./grouper_test.rs"]
mod grouper_test;

use super::Fields;
use crate::label_hash::LabelHasher;
use hashbrown::HashMap;

//
// EventGrouper
//

// Accumulates documents for a single cycle. Documents are identified by the fingerprint of their
// flattened key labels and are returned in creation order.
#[derive(Debug, Default)]
pub struct EventGrouper {
  hasher: LabelHasher,
  events: Vec<Fields>,
  index: HashMap<u64, usize, ahash::RandomState>,
}

impl EventGrouper {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn fingerprint(&mut self, key_labels: &Fields) -> u64 {
    self.hasher.hash_fields(key_labels.as_map())
  }

  // The document for a key label set. A new document starts as a copy of the key labels.
  pub fn event_for(&mut self, key_labels: &Fields) -> &mut Fields {
    let fingerprint = self.fingerprint(key_labels);
    let index = *self.index.entry(fingerprint).or_insert_with(|| {
      self.events.push(key_labels.clone());
      self.events.len() - 1
    });
    &mut self.events[index]
  }

  // Deep merge an update into the document for a key label set.
  pub fn merge(&mut self, key_labels: &Fields, update: Fields) {
    self.event_for(key_labels).deep_update(update);
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.events.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  #[must_use]
  pub fn into_events(self) -> Vec<Fields> {
    self.events
  }
}
