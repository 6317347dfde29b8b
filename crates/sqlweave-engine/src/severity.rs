//! Impact severity classification

use crate::impact::ChangeType;
use serde::{Deserialize, Serialize};
use sqlweave_graph::NodeKind;
use std::fmt;

/// How badly a change affects a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactSeverity {
    /// One level up, saturating at `Critical`
    pub fn escalate(self) -> Self {
        match self {
            Self::None => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl fmt::Display for ImpactSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Distance of a consumer from the changed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Direct,
    Transitive,
}

impl Distance {
    pub fn from_depth(depth: usize) -> Self {
        if depth <= 1 {
            Self::Direct
        } else {
            Self::Transitive
        }
    }
}

/// Fixed severity lookup on (change, distance, consumer kind)
pub fn classify(change: ChangeType, distance: Distance, kind: NodeKind) -> ImpactSeverity {
    use ChangeType::*;
    use Distance::*;
    use ImpactSeverity::*;
    use NodeKind::{File, Table, View};

    match (change, distance, kind) {
        (Drop, Direct, _) => High,
        (Drop, Transitive, _) => Medium,

        (Rename, Direct, _) => High,
        (Rename, Transitive, _) => Low,

        (Alter, Direct, View | Table) => Medium,
        (Alter, Direct, File) => Low,
        (Alter, Transitive, View) => Medium,
        (Alter, Transitive, Table | File) => Low,

        (Modify, Direct, Table) => Medium,
        (Modify, Direct, View | File) => Low,
        (Modify, Transitive, _) => Low,
    }
}

/// Severity for one consumer, escalated when the consumer has no definition
pub fn assess(change: ChangeType, distance: Distance, kind: NodeKind, missing_definition: bool) -> ImpactSeverity {
    let base = classify(change, distance, kind);
    if missing_definition {
        base.escalate()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANGES: [ChangeType; 4] = [ChangeType::Drop, ChangeType::Rename, ChangeType::Alter, ChangeType::Modify];
    const KINDS: [NodeKind; 3] = [NodeKind::Table, NodeKind::View, NodeKind::File];

    #[test]
    fn test_table_rows() {
        assert_eq!(classify(ChangeType::Drop, Distance::Direct, NodeKind::View), ImpactSeverity::High);
        assert_eq!(classify(ChangeType::Drop, Distance::Transitive, NodeKind::File), ImpactSeverity::Medium);
        assert_eq!(classify(ChangeType::Rename, Distance::Transitive, NodeKind::View), ImpactSeverity::Low);
        assert_eq!(classify(ChangeType::Alter, Distance::Transitive, NodeKind::View), ImpactSeverity::Medium);
        assert_eq!(classify(ChangeType::Alter, Distance::Direct, NodeKind::File), ImpactSeverity::Low);
        assert_eq!(classify(ChangeType::Modify, Distance::Direct, NodeKind::Table), ImpactSeverity::Medium);
    }

    #[test]
    fn test_direct_never_below_transitive() {
        for change in CHANGES {
            for kind in KINDS {
                assert!(classify(change, Distance::Direct, kind) >= classify(change, Distance::Transitive, kind));
            }
        }
    }

    #[test]
    fn test_missing_definition_escalates() {
        assert_eq!(
            assess(ChangeType::Drop, Distance::Direct, NodeKind::Table, true),
            ImpactSeverity::Critical
        );
        for change in CHANGES {
            for kind in KINDS {
                let base = assess(change, Distance::Transitive, kind, false);
                assert!(assess(change, Distance::Transitive, kind, true) > base);
            }
        }
    }

    #[test]
    fn test_escalate_saturates() {
        assert_eq!(ImpactSeverity::Critical.escalate(), ImpactSeverity::Critical);
        assert_eq!(ImpactSeverity::None.escalate(), ImpactSeverity::Low);
    }
}
