//! The capability vocabulary shared by both sides of the relation.
//!
//! Each capability maps to one `enable-*` flag key in the published record;
//! the two object-storage capabilities additionally carry a pattern list
//! restricting which resources the grant covers.

use std::fmt;

/// Resource-name prefix applied to unqualified object-storage patterns.
pub const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// A cloud permission or feature a requirer can ask the provider to enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read-only access to certificate management.
    AcmReadonly,
    /// Full access to certificate management.
    AcmFullAccess,
    /// Read-only access to autoscaling groups.
    AutoscalingReadonly,
    /// Ability to inspect instances.
    InstanceInspection,
    /// Ability to modify instances.
    InstanceModification,
    /// Ability to manage networking (firewalls, subnets, etc).
    NetworkManagement,
    /// Ability to manage load balancers.
    LoadBalancerManagement,
    /// Ability to manage block storage.
    BlockStorageManagement,
    /// Ability to manage DNS.
    DnsManagement,
    /// Read-only access to region features.
    RegionReadonly,
    /// Ability to access object storage, optionally pattern-restricted.
    ObjectStorageAccess,
    /// Ability to manage object storage, optionally pattern-restricted.
    ObjectStorageManagement,
}

impl Capability {
    /// Every capability, in published-key order.
    pub const ALL: [Self; 12] = [
        Self::AcmReadonly,
        Self::AcmFullAccess,
        Self::AutoscalingReadonly,
        Self::InstanceInspection,
        Self::InstanceModification,
        Self::NetworkManagement,
        Self::LoadBalancerManagement,
        Self::BlockStorageManagement,
        Self::DnsManagement,
        Self::RegionReadonly,
        Self::ObjectStorageAccess,
        Self::ObjectStorageManagement,
    ];

    /// The `enable-*` flag key this capability publishes under.
    #[must_use]
    pub const fn flag_key(self) -> &'static str {
        match self {
            Self::AcmReadonly => "enable-acm-readonly",
            Self::AcmFullAccess => "enable-acm-fullaccess",
            Self::AutoscalingReadonly => "enable-autoscaling-readonly",
            Self::InstanceInspection => "enable-instance-inspection",
            Self::InstanceModification => "enable-instance-modification",
            Self::NetworkManagement => "enable-network-management",
            Self::LoadBalancerManagement => "enable-load-balancer-management",
            Self::BlockStorageManagement => "enable-block-storage-management",
            Self::DnsManagement => "enable-dns-management",
            Self::RegionReadonly => "enable-region-readonly",
            Self::ObjectStorageAccess => "enable-object-storage-access",
            Self::ObjectStorageManagement => "enable-object-storage-management",
        }
    }

    /// The key of the auxiliary pattern list, for capabilities that carry one.
    #[must_use]
    pub const fn patterns_key(self) -> Option<&'static str> {
        match self {
            Self::ObjectStorageAccess => Some("object-storage-access-patterns"),
            Self::ObjectStorageManagement => Some("object-storage-management-patterns"),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // flag key minus the "enable-" prefix
        let key = self.flag_key();
        write!(f, "{}", &key["enable-".len()..])
    }
}

/// Qualifies object-storage patterns with the resource-name prefix.
///
/// Patterns already carrying the prefix pass through unchanged; this is a
/// string-normalization convenience, not a security boundary.
#[must_use]
pub fn qualify_patterns(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|pattern| {
            if pattern.starts_with(S3_ARN_PREFIX) {
                pattern
            } else {
                format!("{S3_ARN_PREFIX}{pattern}")
            }
        })
        .collect()
}
