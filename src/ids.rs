// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipewright contributors

//! Typed identifiers
//!
//! Pipelines, jobs, artifacts and deployments are identified by random
//! UUIDs. Runners keep the identifier they registered with.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identifier of one pipeline run
    PipelineId
);
uuid_id!(
    /// Identifier of one job run
    JobId
);
uuid_id!(
    /// Identifier of a stored artifact
    ArtifactId
);
uuid_id!(
    /// Identifier of a deployment
    DeploymentId
);

/// Identifier a runner registered with
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnerId(String);

impl RunnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RunnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(PipelineId::new(), PipelineId::new());
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let runner = RunnerId::from("docker-1");
        assert_eq!(serde_json::to_string(&runner).unwrap(), "\"docker-1\"");

        let id = DeploymentId::new();
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{}\"", id));
    }
}
