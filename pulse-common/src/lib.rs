// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

// Install the process wide logger. Honors RUST_LOG and is safe to call more than once, which
// happens when several test binaries share this crate.
pub fn global_initialize() {
  let _ignored = env_logger::Builder::from_env(
    env_logger::Env::default().default_filter_or("info"),
  )
  .format_timestamp_micros()
  .try_init();
}

pub trait LossyFloatToInt {
  fn lossy_to_u64(self) -> u64;
  fn lossy_to_i64(self) -> i64;
}

impl LossyFloatToInt for f64 {
  #[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
  )]
  fn lossy_to_u64(self) -> u64 {
    self as u64
  }

  #[allow(clippy::cast_possible_truncation)]
  fn lossy_to_i64(self) -> i64 {
    self as i64
  }
}
