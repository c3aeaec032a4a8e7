// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./fields_test.rs"]
mod fields_test;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

//
// Fields
//

// A nested field tree. Dotted keys passed to put() and get_value() address nested objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Map<String, Value>);

impl Fields {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  // Set a value at a dotted path, creating intermediate objects. A non object found along the
  // path is replaced by an object.
  pub fn put(&mut self, key: &str, value: Value) {
    let mut current = &mut self.0;
    let mut segments = key.split('.').peekable();
    while let Some(segment) = segments.next() {
      if segments.peek().is_none() {
        current.insert(segment.to_string(), value);
        return;
      }

      let next = current
        .entry(segment.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
      if !next.is_object() {
        *next = Value::Object(Map::new());
      }
      let Value::Object(next) = next else {
        return;
      };
      current = next;
    }
  }

  // Insert a literal top level key. Dots are not interpreted.
  pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
    self.0.insert(key, value)
  }

  // Look up a dotted path.
  #[must_use]
  pub fn get_value(&self, key: &str) -> Option<&Value> {
    let mut segments = key.split('.');
    let mut value = self.0.get(segments.next()?)?;
    for segment in segments {
      value = value.as_object()?.get(segment)?;
    }
    Some(value)
  }

  // Every leaf keyed by its dotted path. Empty objects are leaves.
  #[must_use]
  pub fn flatten(&self) -> Vec<(String, &Value)> {
    fn visit<'a>(prefix: &str, map: &'a Map<String, Value>, out: &mut Vec<(String, &'a Value)>) {
      for (key, value) in map {
        let path = if prefix.is_empty() {
          key.clone()
        } else {
          format!("{prefix}.{key}")
        };
        match value {
          Value::Object(nested) if !nested.is_empty() => visit(&path, nested, out),
          _ => out.push((path, value)),
        }
      }
    }

    let mut out = Vec::new();
    visit("", &self.0, &mut out);
    out
  }

  // Merge another tree into this one. Objects present on both sides are merged key by key, any
  // other value is overwritten.
  pub fn deep_update(&mut self, other: Self) {
    deep_merge(&mut self.0, other.0);
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  #[must_use]
  pub const fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  #[must_use]
  pub fn into_inner(self) -> Map<String, Value> {
    self.0
  }
}

fn deep_merge(target: &mut Map<String, Value>, source: Map<String, Value>) {
  for (key, value) in source {
    match (target.get_mut(&key), value) {
      (Some(Value::Object(existing)), Value::Object(incoming)) => deep_merge(existing, incoming),
      (_, value) => {
        target.insert(key, value);
      },
    }
  }
}

impl From<Map<String, Value>> for Fields {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

impl From<Fields> for Value {
  fn from(fields: Fields) -> Self {
    Self::Object(fields.0)
  }
}
