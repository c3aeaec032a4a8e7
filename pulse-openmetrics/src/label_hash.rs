// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./label_hash_test.rs"]
mod label_hash_test;

use serde_json::{Map, Value};
use xxhash_rust::xxh64::xxh64;

// Written after every label name and value. 0xff is never part of valid UTF-8 so it cannot
// appear in label text.
const SEPARATOR: u8 = 0xff;

#[derive(Clone, Copy, Debug)]
struct LabelSpan {
  key_start: usize,
  key_end: usize,
  value_end: usize,
}

//
// LabelHasher
//

// Computes an order independent fingerprint for a label set: labels are sorted by name and
// "name SEP value SEP" is hashed with XXH64. The hasher owns its scratch buffers so repeated calls
// on the same instance stop allocating once the buffers fit the largest label set seen.
#[derive(Debug, Default)]
pub struct LabelHasher {
  path: Vec<u8>,
  staging: Vec<u8>,
  spans: Vec<LabelSpan>,
  scratch: Vec<u8>,
}

impl LabelHasher {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  // Hash a field style label set. Only string values participate.
  pub fn hash<'a>(&mut self, labels: impl IntoIterator<Item = (&'a str, &'a Value)>) -> u64 {
    self.reset();
    for (name, value) in labels {
      if let Value::String(value) = value {
        self.stage(name, value);
      }
    }
    self.finish()
  }

  // Hash a plain name/value label set.
  pub fn hash_str<'a>(&mut self, labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> u64 {
    self.reset();
    for (name, value) in labels {
      self.stage(name, value);
    }
    self.finish()
  }

  // Hash a nested field tree as if it were flattened into dotted paths. Only string leaves
  // participate, so this agrees with hash() over Fields::flatten().
  pub fn hash_fields(&mut self, fields: &Map<String, Value>) -> u64 {
    self.reset();
    self.stage_fields(fields);
    self.finish()
  }

  fn stage_fields(&mut self, fields: &Map<String, Value>) {
    for (name, value) in fields {
      let path_len = self.path.len();
      if path_len > 0 {
        self.path.push(b'.');
      }
      self.path.extend_from_slice(name.as_bytes());
      match value {
        Value::String(value) => {
          let key_start = self.staging.len();
          self.staging.extend_from_slice(&self.path);
          self.push_span(key_start, value);
        },
        Value::Object(nested) => self.stage_fields(nested),
        _ => {},
      }
      self.path.truncate(path_len);
    }
  }

  fn reset(&mut self) {
    self.path.clear();
    self.staging.clear();
    self.spans.clear();
    self.scratch.clear();
  }

  fn stage(&mut self, name: &str, value: &str) {
    let key_start = self.staging.len();
    self.staging.extend_from_slice(name.as_bytes());
    self.push_span(key_start, value);
  }

  // Record a span whose key was just written at key_start and append its value.
  fn push_span(&mut self, key_start: usize, value: &str) {
    let key_end = self.staging.len();
    self.staging.extend_from_slice(value.as_bytes());
    self.spans.push(LabelSpan {
      key_start,
      key_end,
      value_end: self.staging.len(),
    });
  }

  fn finish(&mut self) -> u64 {
    let staging = &self.staging;
    self.spans.sort_unstable_by(|lhs, rhs| {
      staging[lhs.key_start .. lhs.key_end].cmp(&staging[rhs.key_start .. rhs.key_end])
    });

    for span in &self.spans {
      self
        .scratch
        .extend_from_slice(&staging[span.key_start .. span.key_end]);
      self.scratch.push(SEPARATOR);
      self
        .scratch
        .extend_from_slice(&staging[span.key_end .. span.value_end]);
      self.scratch.push(SEPARATOR);
    }

    xxh64(&self.scratch, 0)
  }
}

// One shot hash of a field map. Prefer a long lived LabelHasher on hot paths.
#[must_use]
pub fn label_hash(labels: &serde_json::Map<String, Value>) -> u64 {
  LabelHasher::new().hash(labels.iter().map(|(name, value)| (name.as_str(), value)))
}
