// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machine-readable plan parsing.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::tracker::{
    ResourceAction, ResourceStatus, ResourceUpdate, is_data_source, provider_from_type,
};

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    address: String,
    #[serde(default)]
    module_address: Option<String>,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    provider_name: String,
    #[serde(default)]
    change: Option<Change>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    before: Option<Value>,
    #[serde(default)]
    after: Option<Value>,
}

/// Extract the planned managed-resource changes from `terraform show -json`.
///
/// Data sources and resources with nothing to do are left out; every
/// returned update is `pending`.
pub fn parse_plan_json(plan_json: &str) -> Result<Vec<ResourceUpdate>> {
    let plan: PlanDocument = serde_json::from_str(plan_json)
        .map_err(|e| EngineError::Parse(format!("failed to unmarshal plan: {}", e)))?;

    let mut resources = Vec::new();
    for change in plan.resource_changes {
        if is_data_source(&change.address) {
            continue;
        }
        let actions = change
            .change
            .as_ref()
            .map(|c| c.actions.as_slice())
            .unwrap_or_default();
        let Some(action) = planned_action(actions) else {
            continue;
        };

        let details = resource_details(&change);
        resources.push(ResourceUpdate {
            id: change.address.clone(),
            name: change.name.clone(),
            provider: provider_from_type(&change.resource_type),
            resource_type: change.resource_type.clone(),
            action,
            status: ResourceStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_secs: None,
            error: None,
            details,
        });
    }
    Ok(resources)
}

fn planned_action(actions: &[String]) -> Option<ResourceAction> {
    match actions {
        [a, b] if (a == "create" && b == "delete") || (a == "delete" && b == "create") => {
            Some(ResourceAction::Replace)
        }
        [first, ..] => match first.as_str() {
            "create" => Some(ResourceAction::Create),
            "update" => Some(ResourceAction::Update),
            "delete" => Some(ResourceAction::Delete),
            _ => None,
        },
        [] => None,
    }
}

fn resource_details(change: &ResourceChange) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("type".into(), Value::from(change.resource_type.clone()));
    details.insert("provider".into(), Value::from(change.provider_name.clone()));
    if let Some(module) = change.module_address.as_deref().filter(|m| !m.is_empty()) {
        details.insert("module".into(), Value::from(module));
    }

    // Deletes only have `before`.
    let source = change.change.as_ref().and_then(|c| {
        c.after
            .as_ref()
            .filter(|v| !v.is_null())
            .or(c.before.as_ref())
            .and_then(Value::as_object)
    });
    if let Some(source) = source {
        for key in ["name", "zone", "region", "machine_type"] {
            if let Some(value) = source.get(key).and_then(Value::as_str) {
                details.insert(key.into(), Value::from(value));
            }
        }
        if let Some(size) = source.get("size").filter(|v| v.is_number()) {
            details.insert("size".into(), size.clone());
        }
    }
    details
}
