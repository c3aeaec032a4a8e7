// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod client;
pub mod config;
pub mod counter_cache;
pub mod event;
pub mod exposition;
pub mod family;
pub mod filter;
pub mod label_hash;
pub mod mapping;
pub mod typed;

#[cfg(test)]
pub mod test;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use pulse_common::global_initialize;

  global_initialize();
}
