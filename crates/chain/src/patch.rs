//! Serde helpers for partial-update payloads.
//!
//! A missing key and an explicit `null` mean different things in an update:
//! missing keeps the stored value, `null` clears it. Fields declared as
//! `Option<Option<T>>` with `#[serde(default, deserialize_with = "explicit")]`
//! come out as `None` (missing), `Some(None)` (null) or `Some(Some(v))`.

use serde::{Deserialize, Deserializer};

pub(crate) fn explicit<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Records that a key was present, whatever its value (including `null`).
pub(crate) fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}
