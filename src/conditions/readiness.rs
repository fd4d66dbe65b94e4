// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Readiness from common status conventions.
//!
//! | Kind | Ready when |
//! |------|------------|
//! | `Deployment`, `StatefulSet`, `ReplicaSet`, `ReplicationController` | `status.readyReplicas >= spec.replicas` (default 1) |
//! | `DaemonSet` | `status.numberReady >= status.desiredNumberScheduled` |
//! | `Pod` | `Ready` condition is `True`, or phase `Running` when no conditions are reported |
//! | anything with a `Ready`/`Available` condition | that condition is `True` |
//! | anything else | it exists |

use serde_json::Value as JsonValue;

const REPLICATED_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "ReplicaSet",
    "ReplicationController",
];

/// Whether `target` is ready. A missing object is never ready.
#[must_use]
pub fn is_ready(target: Option<&JsonValue>) -> bool {
    let Some(object) = target.filter(|t| !t.is_null()) else {
        return false;
    };
    let kind = object.get("kind").and_then(JsonValue::as_str).unwrap_or_default();
    let status = object.get("status");

    if REPLICATED_KINDS.contains(&kind) {
        let desired = object
            .pointer("/spec/replicas")
            .and_then(JsonValue::as_i64)
            .unwrap_or(1);
        let ready = status
            .and_then(|s| s.get("readyReplicas"))
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        return ready >= desired;
    }

    if kind == "DaemonSet" {
        let desired = status
            .and_then(|s| s.get("desiredNumberScheduled"))
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        let ready = status
            .and_then(|s| s.get("numberReady"))
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        return ready >= desired;
    }

    if let Some(ready) = condition_status(status, "Ready") {
        return ready;
    }

    if kind == "Pod" {
        let phase = status
            .and_then(|s| s.get("phase"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        return phase == "Running" || phase == "Ready";
    }

    condition_status(status, "Available").unwrap_or(true)
}

/// `Some(true)` if the condition of `condition_type` is `True`, `None` if absent.
fn condition_status(status: Option<&JsonValue>, condition_type: &str) -> Option<bool> {
    status?
        .get("conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(JsonValue::as_str) == Some(condition_type))
        .map(|c| c.get("status").and_then(JsonValue::as_str) == Some("True"))
}
