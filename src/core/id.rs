//! Purpose: Pointer identity shared by handles, stores, and reply correlation.
//! Exports: `PointerId`.
//! Role: Opaque string key; generated ids are simple-form v4 uuids.
//! Invariants: A generated id never repeats within a process.
//! Invariants: Ids encode as bare JSON strings and compare by their text.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointerId(String);

impl PointerId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PointerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PointerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
