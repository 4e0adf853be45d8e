// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node naming.

use std::sync::LazyLock;

use regex::Regex;

static INVALID_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new("[^a-z0-9-]+").expect("valid regex")
});

/// Make `name` acceptable as a cloud resource name: lowercase letters,
/// digits and dashes, starting with a letter and not ending with a dash.
pub fn sanitize_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "-");
    let trimmed = replaced
        .trim_start_matches(|c: char| !c.is_ascii_lowercase())
        .trim_end_matches('-');
    if trimmed.is_empty() {
        "stolos".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One more than the highest `N` among names of the form `{prefix}-N`.
pub fn next_node_number<'a>(prefix: &str, names: impl IntoIterator<Item = &'a str>) -> u32 {
    let lead = format!("{}-", prefix);
    names
        .into_iter()
        .filter_map(|name| name.strip_prefix(&lead))
        .filter_map(|suffix| suffix.parse::<u32>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Worker_Pool 1"), "worker-pool-1");
        assert_eq!(sanitize_name("42-gpu--"), "gpu");
        assert_eq!(sanitize_name("---"), "stolos");
        assert_eq!(sanitize_name("node-3"), "node-3");
    }

    #[test]
    fn test_next_node_number() {
        let names = ["worker-1", "worker-7", "worker-x", "workers-9", "other-12"];
        assert_eq!(next_node_number("worker", names), 8);
        assert_eq!(next_node_number("gpu", names), 1);
    }
}
