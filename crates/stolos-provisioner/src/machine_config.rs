// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-node machine configuration derived from the cluster's base config.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// Default install target for cloud nodes.
pub const DEFAULT_INSTALL_DISK: &str = "/dev/sda";

fn child<'a>(parent: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping> {
    let entry = parent
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry.as_mapping_mut().ok_or_else(|| {
        Error::InvalidRequest(format!("machine config field '{}' is not a map", key))
    })
}

/// Set hostname, install disk and node labels on `base`, dropping any
/// install disk selector so the explicit disk is used.
pub fn patch_machine_config(
    base: &str,
    hostname: &str,
    install_disk: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(base)?;
    if doc.is_null() {
        doc = Value::Mapping(Mapping::new());
    }
    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| Error::InvalidRequest("machine config is not a map".to_string()))?;
    let machine = child(root, "machine")?;

    child(machine, "network")?.insert(Value::from("hostname"), Value::from(hostname));

    let install = child(machine, "install")?;
    install.insert(Value::from("disk"), Value::from(install_disk));
    install.remove(Value::from("diskSelector"));

    if !labels.is_empty() {
        let node_labels = child(machine, "nodeLabels")?;
        for (k, v) in labels {
            node_labels.insert(Value::from(k.as_str()), Value::from(v.as_str()));
        }
    }

    Ok(serde_yaml::to_string(&doc)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
version: v1alpha1
machine:
  type: worker
  install:
    image: ghcr.io/siderolabs/installer:v1.8.0
    diskSelector:
      size: ">= 10GB"
  nodeLabels:
    existing: "yes"
cluster:
  clusterName: stolos
"#;

    #[test]
    fn test_patch_sets_fields_and_drops_selector() {
        let labels = BTreeMap::from([("role".to_string(), "worker".to_string())]);
        let out = patch_machine_config(BASE, "worker-1", "/dev/nvme0n1", &labels).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();

        assert_eq!(doc["machine"]["network"]["hostname"], Value::from("worker-1"));
        assert_eq!(doc["machine"]["install"]["disk"], Value::from("/dev/nvme0n1"));
        assert!(doc["machine"]["install"].get("diskSelector").is_none());
        assert_eq!(
            doc["machine"]["install"]["image"],
            Value::from("ghcr.io/siderolabs/installer:v1.8.0")
        );
        assert_eq!(doc["machine"]["nodeLabels"]["role"], Value::from("worker"));
        assert_eq!(doc["machine"]["nodeLabels"]["existing"], Value::from("yes"));
        assert_eq!(doc["cluster"]["clusterName"], Value::from("stolos"));
    }

    #[test]
    fn test_patch_empty_base() {
        let out = patch_machine_config("", "cp-1", DEFAULT_INSTALL_DISK, &BTreeMap::new()).unwrap();
        let doc: Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["machine"]["install"]["disk"], Value::from("/dev/sda"));
    }

    #[test]
    fn test_patch_rejects_scalar_document() {
        assert!(patch_machine_config("just text", "n", "/dev/sda", &BTreeMap::new()).is_err());
    }
}
