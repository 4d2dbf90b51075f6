//! Resource partitions.
//!
//! A partition scopes fan-out: a connection registered under `work-orders`
//! only receives work-order changes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a partition name is not one of the known partitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown resource partition: {0}")]
pub struct UnknownPartition(pub String);

/// A logical grouping of connections by resource type.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Partition {
    /// Work order changes.
    #[default]
    #[serde(rename = "work-orders")]
    WorkOrders,
    /// Student changes.
    #[serde(rename = "students")]
    Students,
}

impl Partition {
    /// Every known partition.
    pub const ALL: [Partition; 2] = [Partition::WorkOrders, Partition::Students];

    /// The wire name of the partition.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Partition::WorkOrders => "work-orders",
            Partition::Students => "students",
        }
    }

    /// The `type` tag of change notifications fanned out to this partition.
    #[must_use]
    pub const fn update_type(&self) -> &'static str {
        match self {
            Partition::WorkOrders => "workOrdersUpdate",
            Partition::Students => "studentsUpdate",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = UnknownPartition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work-orders" => Ok(Partition::WorkOrders),
            "students" => Ok(Partition::Students),
            other => Err(UnknownPartition(other.to_string())),
        }
    }
}
