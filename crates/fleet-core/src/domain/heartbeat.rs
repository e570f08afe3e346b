//! Heartbeat command objects and the per-device resend cache.
//!
//! The control plane learns about devices from JSON command objects sent over
//! the heartbeat link.  Updates may be partial (for example only
//! `{"udid": "X", "colding": false}`), so the provider keeps the merged view
//! of every device in a [`HeartbeatCache`].  After a reconnect the whole cache
//! is replayed, which rebuilds the control plane's view no matter how many
//! individual updates were missed while the link was down.
//!
//! # Merge rules
//!
//! - Nested objects are merged key by key.
//! - Everything else (strings, numbers, arrays, `null`) overwrites.
//!
//! Merging the same update twice leaves the cache unchanged, so replaying a
//! queue that contains duplicates is harmless.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

/// Key that identifies the device a command object refers to.
pub const UDID_KEY: &str = "udid";

/// Recursively merges `update` into `target`.
///
/// If `update` is not an object it simply replaces `target`.
///
/// # Examples
///
/// ```rust
/// use fleet_core::merge_recursive;
/// use serde_json::json;
///
/// let mut record = json!({"provider": {"a": 1}, "colding": true});
/// merge_recursive(&mut record, &json!({"provider": {"b": 2}, "colding": false}));
/// assert_eq!(record, json!({"provider": {"a": 1, "b": 2}, "colding": false}));
/// ```
pub fn merge_recursive(target: &mut Value, update: &Value) {
    let Value::Object(update_map) = update else {
        *target = update.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in update_map {
            if value.is_object() {
                let slot = target_map.entry(key.clone()).or_insert(Value::Null);
                merge_recursive(slot, value);
            } else {
                target_map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Last-known merged record for every device, keyed by udid.
///
/// A `BTreeMap` keeps the replay order deterministic (sorted by udid).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatCache {
    entries: BTreeMap<String, Value>,
}

impl HeartbeatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `message` into the record for its udid.
    ///
    /// Messages without a string `udid` (pings, handshakes) are not cached;
    /// `false` is returned for those.
    pub fn apply(&mut self, message: &Value) -> bool {
        let Some(udid) = message.get(UDID_KEY).and_then(Value::as_str) else {
            return false;
        };
        let slot = self
            .entries
            .entry(udid.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        merge_recursive(slot, message);
        true
    }

    /// Returns the merged record for `udid`.
    pub fn get(&self, udid: &str) -> Option<&Value> {
        self.entries.get(udid)
    }

    /// Iterates over every cached record in udid order.
    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Identity advertised to the control plane when the link is (re)established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Provider name shown by the control plane.
    pub name: String,
    /// Optional owner e-mail.
    pub owner: Option<String>,
    /// Shared secret the control plane must present on callbacks.
    pub secret: String,
    /// Callback URL of this provider.
    pub url: String,
    /// Larger means more important.
    pub priority: u32,
}

impl Handshake {
    /// Builds the `handshake` command object.
    pub fn to_message(&self) -> Value {
        json!({
            "command": "handshake",
            "name": self.name,
            "owner": self.owner,
            "secret": self.secret,
            "url": self.url,
            "priority": self.priority,
        })
    }
}

/// Turns a device update into an `update` command object for `platform`.
///
/// Non-object input is wrapped so the result is always an object.
pub fn update_message(data: Value, platform: &str) -> Value {
    let mut map = match data {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    map.insert("command".to_string(), Value::from("update"));
    map.insert("platform".to_string(), Value::from(platform));
    Value::Object(map)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overwrites_scalars_and_merges_objects() {
        // Arrange
        let mut target = json!({
            "udid": "X",
            "colding": true,
            "provider": {"atxAgentAddress": "10.0.0.1:20001"},
        });
        let update = json!({
            "colding": false,
            "provider": {"whatsInputAddress": "10.0.0.1:20003"},
        });

        // Act
        merge_recursive(&mut target, &update);

        // Assert
        assert_eq!(
            target,
            json!({
                "udid": "X",
                "colding": false,
                "provider": {
                    "atxAgentAddress": "10.0.0.1:20001",
                    "whatsInputAddress": "10.0.0.1:20003",
                },
            })
        );
    }

    #[test]
    fn test_merge_null_overwrites_nested_object() {
        // A removal report sets provider to null.
        let mut target = json!({"provider": {"a": 1}});
        merge_recursive(&mut target, &json!({"provider": null}));
        assert_eq!(target, json!({"provider": null}));
    }

    #[test]
    fn test_merge_object_onto_null_starts_fresh() {
        let mut target = json!({"provider": null});
        merge_recursive(&mut target, &json!({"provider": {"a": 1}}));
        assert_eq!(target, json!({"provider": {"a": 1}}));
    }

    #[test]
    fn test_merge_arrays_are_replaced_not_concatenated() {
        let mut target = json!({"tags": [1, 2]});
        merge_recursive(&mut target, &json!({"tags": [3]}));
        assert_eq!(target, json!({"tags": [3]}));
    }

    #[test]
    fn test_cache_apply_twice_is_idempotent() {
        // Arrange
        let update = json!({
            "udid": "X",
            "provider": {"atxAgentAddress": "h:1"},
            "properties": {"brand": "Pixel"},
        });
        let mut once = HeartbeatCache::new();
        let mut twice = HeartbeatCache::new();

        // Act
        once.apply(&update);
        twice.apply(&update);
        twice.apply(&update);

        // Assert
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cache_ignores_messages_without_udid() {
        let mut cache = HeartbeatCache::new();
        assert!(!cache.apply(&json!({"command": "ping"})));
        assert!(!cache.apply(&json!({"udid": 42})));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_keeps_one_record_per_udid() {
        let mut cache = HeartbeatCache::new();
        cache.apply(&json!({"udid": "Y", "colding": true}));
        cache.apply(&json!({"udid": "X", "colding": true}));
        cache.apply(&json!({"udid": "Y", "colding": false}));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("Y").unwrap()["colding"], json!(false));
        let order: Vec<&str> = cache
            .records()
            .map(|r| r["udid"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["X", "Y"]);
    }

    #[test]
    fn test_handshake_message_shape() {
        let hs = Handshake {
            name: "fleet-provider".into(),
            owner: None,
            secret: "ABC".into(),
            url: "http://10.0.0.1:3500".into(),
            priority: 2,
        };
        let msg = hs.to_message();
        assert_eq!(msg["command"], "handshake");
        assert_eq!(msg["secret"], "ABC");
        assert_eq!(msg["priority"], 2);
        assert!(msg["owner"].is_null());
    }

    #[test]
    fn test_update_message_stamps_command_and_platform() {
        let msg = update_message(json!({"udid": "X"}), "android");
        assert_eq!(msg["command"], "update");
        assert_eq!(msg["platform"], "android");
        assert_eq!(msg["udid"], "X");
    }
}
