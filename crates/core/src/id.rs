//! Unique identifiers for orchestration entities.
//!
//! Identifiers are opaque strings because rows may originate from the backing
//! store or the sibling scheduler. Locally generated ids are ULIDs.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self(Ulid::new().to_string())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a Task
    TaskId
);

string_id!(
    /// Unique identifier for a Mission. Equal to the `root_task_id` of its tasks.
    MissionId
);

string_id!(
    /// Identifier for an agent
    AgentId
);

string_id!(
    /// Identifier for a gateway run (idempotency key or gateway-assigned id)
    RunId
);

string_id!(
    /// Unique identifier for an activity event
    EventId
);

impl From<TaskId> for MissionId {
    fn from(id: TaskId) -> Self {
        Self(id.0)
    }
}

impl From<&TaskId> for MissionId {
    fn from(id: &TaskId) -> Self {
        Self(id.0.clone())
    }
}

impl MissionId {
    /// The id of the root task this mission is keyed by.
    pub fn root_task_id(&self) -> TaskId {
        TaskId(self.0.clone())
    }
}
