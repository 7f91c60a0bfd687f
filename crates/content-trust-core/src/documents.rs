//! Builds the root and targets documents for the next publish.

use std::collections::BTreeMap;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::continuity::Continuity;
use crate::metadata::{
    KeyRecord, MetadataError, RoleBinding, RootSigned, TargetMap, TargetsSigned, ROLE_ROOT,
    ROLE_SNAPSHOT, ROLE_TARGETS, ROLE_TIMESTAMP,
};
use crate::signer::{whole_seconds, SigningIdentity};

/// Lifetime of a freshly published targets document.
pub const TARGETS_VALIDITY: Duration = Duration::days(3 * 365);

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("failed to format expiry: {0}")]
    Format(#[from] time::error::Format),
    #[error("expiry is out of range")]
    ExpiryOutOfRange,
}

/// How new targets combine with the published ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetsMode {
    /// Publish exactly the new target set.
    #[default]
    Replace,
    /// Keep every published target, adding or overriding the new ones.
    AddOnly,
}

/// Target map to publish given the new entries and the published map.
pub fn assemble_targets(
    new: TargetMap,
    prior: Option<&TargetMap>,
    mode: TargetsMode,
) -> TargetMap {
    match (mode, prior) {
        (TargetsMode::AddOnly, Some(prior)) => {
            let mut merged = prior.clone();
            merged.extend(new);
            merged
        }
        _ => new,
    }
}

/// Root document binding each role to its resolved key.
pub fn build_root(
    continuity: &Continuity,
    identity: &SigningIdentity,
) -> Result<RootSigned, DocumentError> {
    let role_keys: [(&str, &KeyRecord); 4] = [
        (ROLE_ROOT, &continuity.keys.root),
        (ROLE_TARGETS, &continuity.keys.targets),
        (ROLE_SNAPSHOT, &continuity.keys.snapshot),
        (ROLE_TIMESTAMP, &continuity.keys.timestamp),
    ];
    let mut keys = BTreeMap::new();
    let mut roles = BTreeMap::new();
    for (role, record) in role_keys {
        let key_id = record.key_id()?;
        keys.insert(key_id.clone(), record.clone());
        roles.insert(role.to_string(), RoleBinding::single(key_id));
    }
    let version = next_version(continuity.prior_root_version);
    let expires = format_expiry(identity.validity.not_after)?;
    Ok(RootSigned::new(expires, keys, roles, version))
}

/// Targets document valid for [`TARGETS_VALIDITY`] from `now`.
pub fn build_targets(
    targets: TargetMap,
    prior_version: Option<u64>,
    now: OffsetDateTime,
) -> Result<TargetsSigned, DocumentError> {
    let expires = now
        .checked_add(TARGETS_VALIDITY)
        .ok_or(DocumentError::ExpiryOutOfRange)?;
    Ok(TargetsSigned::new(
        format_expiry(expires)?,
        targets,
        next_version(prior_version),
    ))
}

/// RFC 3339 UTC timestamp with second precision.
pub fn format_expiry(at: OffsetDateTime) -> Result<String, DocumentError> {
    let utc = at
        .checked_to_offset(UtcOffset::UTC)
        .ok_or(DocumentError::ExpiryOutOfRange)?;
    Ok(whole_seconds(utc).format(&Rfc3339)?)
}

fn next_version(prior: Option<u64>) -> u64 {
    prior.map_or(1, |version| version.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuity::{ContinuityDecision, RoleKeys};
    use crate::metadata::{TargetEntry, KEY_TYPE_ECDSA};
    use crate::signer::Validity;
    use time::macros::datetime;

    fn entry(length: u64) -> TargetEntry {
        TargetEntry {
            hashes: BTreeMap::from([("sha256".to_string(), "AA==".to_string())]),
            length,
        }
    }

    fn map(entries: &[(&str, u64)]) -> TargetMap {
        entries
            .iter()
            .map(|(name, length)| (name.to_string(), entry(*length)))
            .collect()
    }

    fn identity() -> SigningIdentity {
        SigningIdentity {
            public_key: b"spki".to_vec(),
            algorithm: KEY_TYPE_ECDSA,
            validity: Validity::new(
                datetime!(2024-01-01 0:00 UTC),
                Some(datetime!(2034-01-01 0:00 UTC)),
            )
            .unwrap(),
        }
    }

    fn continuity(prior_root_version: Option<u64>) -> Continuity {
        Continuity {
            decision: ContinuityDecision::FullReset,
            keys: RoleKeys {
                root: KeyRecord::certificate("root-cert"),
                targets: KeyRecord::public_key(b"targets"),
                snapshot: KeyRecord::public_key(b"snapshot"),
                timestamp: KeyRecord::public_key(b"timestamp"),
            },
            prior_root_version,
        }
    }

    #[test]
    fn replace_publishes_only_new_entries() {
        let prior = map(&[("old", 1), ("shared", 1)]);
        let assembled = assemble_targets(map(&[("shared", 2)]), Some(&prior), TargetsMode::Replace);
        assert_eq!(assembled, map(&[("shared", 2)]));
    }

    #[test]
    fn add_only_carries_prior_entries_forward() {
        let prior = map(&[("old", 1), ("shared", 1)]);
        let assembled = assemble_targets(
            map(&[("shared", 2), ("new", 3)]),
            Some(&prior),
            TargetsMode::AddOnly,
        );
        assert_eq!(assembled, map(&[("old", 1), ("shared", 2), ("new", 3)]));

        let first = assemble_targets(map(&[("new", 3)]), None, TargetsMode::AddOnly);
        assert_eq!(first, map(&[("new", 3)]));
    }

    #[test]
    fn root_binds_every_role_with_threshold_one() {
        let root = build_root(&continuity(None), &identity()).unwrap();

        assert_eq!(root.version, 1);
        assert_eq!(root.expires, "2034-01-01T00:00:00Z");
        assert_eq!(root.keys.len(), 4);
        for role in [ROLE_ROOT, ROLE_TARGETS, ROLE_SNAPSHOT, ROLE_TIMESTAMP] {
            let binding = &root.roles[role];
            assert_eq!(binding.threshold, 1);
            assert!(root.keys.contains_key(&binding.keyids[0]), "role {role}");
        }
        let (_, root_key) = root.role_key(ROLE_ROOT).unwrap();
        assert_eq!(root_key, &KeyRecord::certificate("root-cert"));
    }

    #[test]
    fn root_version_follows_prior() {
        let root = build_root(&continuity(Some(41)), &identity()).unwrap();
        assert_eq!(root.version, 42);
    }

    #[test]
    fn targets_expire_three_years_out_at_second_precision() {
        let now = datetime!(2025-03-04 05:06:07.891 UTC);
        let targets = build_targets(map(&[("a", 1)]), Some(6), now).unwrap();

        assert_eq!(targets.version, 7);
        assert_eq!(targets.expires, "2028-03-03T05:06:07Z");
        assert_eq!(build_targets(TargetMap::new(), None, now).unwrap().version, 1);
    }

    #[test]
    fn format_expiry_normalises_to_utc() {
        let at = datetime!(2030-06-01 12:00:00.5 +02:00);
        assert_eq!(format_expiry(at).unwrap(), "2030-06-01T10:00:00Z");
    }

    #[test]
    fn expiry_past_the_calendar_is_an_error() {
        let at = datetime!(9999-12-31 23:00 -05:00);
        assert!(matches!(format_expiry(at), Err(DocumentError::ExpiryOutOfRange)));
    }
}
