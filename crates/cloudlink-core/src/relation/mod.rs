//! Relation lifecycle events.
//!
//! The library never polls: the host's event framework delivers discrete
//! lifecycle events for the relation, and each façade reacts inside an
//! explicit `handle_event` transition function. Keeping the event type a
//! plain enum decouples the protocol from any particular dispatch framework
//! and makes the state machines drivable from a test harness.

use crate::record::RawRecord;

/// A lifecycle event for one relation, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationEvent {
    /// A remote unit joined the relation.
    Joined {
        /// Name of the remote unit (e.g. `aws-integrator/0`).
        unit: String,
    },
    /// A remote unit's published data changed (or arrived for the first
    /// time). Carries that unit's full current record.
    Changed {
        /// Name of the remote unit.
        unit: String,
        /// The unit's complete published record as currently converged.
        record: RawRecord,
    },
    /// A remote unit departed the relation.
    Departed {
        /// Name of the remote unit.
        unit: String,
    },
    /// The relation itself was torn down.
    Broken,
}

impl RelationEvent {
    /// The remote unit the event concerns, when it concerns one.
    #[must_use]
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Joined { unit } | Self::Departed { unit } | Self::Changed { unit, .. } => {
                Some(unit)
            }
            Self::Broken => None,
        }
    }
}

/// Extracts the application name from a unit name (`app/0` → `app`).
#[must_use]
pub fn application_name(unit: &str) -> &str {
    unit.split('/').next().unwrap_or(unit)
}
