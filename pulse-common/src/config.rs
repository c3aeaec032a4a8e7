// pulse - bitdrift's observability proxy
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use serde::de::DeserializeOwned;

// Convert a YAML value into a typed config by round tripping through JSON.
pub fn yaml_value_to_config<T: DeserializeOwned>(value: serde_yaml::Value) -> anyhow::Result<T> {
  let json = serde_json::to_value(value)?;
  Ok(serde_json::from_value(json)?)
}

// Convert a YAML string into a typed config.
pub fn yaml_to_config<T: DeserializeOwned>(yaml: &str) -> anyhow::Result<T> {
  let yaml: serde_yaml::Value = serde_yaml::from_str(yaml)?;
  yaml_value_to_config(yaml)
}

// Read a YAML file into a typed config.
pub fn yaml_file_to_config<T: DeserializeOwned>(path: &std::path::Path) -> anyhow::Result<T> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| anyhow::anyhow!("unable to read config file {}: {e}", path.display()))?;
  log::debug!("loaded config file {}", path.display());
  yaml_to_config(&contents)
}
