//! Key continuity between the published root and this run's signing identity.
//!
//! The certificate in the prior root is compared with a certificate freshly
//! minted for the current identity. Identical content apart from the serial
//! means the signer is unchanged and every key is reused; the same public key
//! under different certificate content means only the root certificate
//! rotates; anything else regenerates the whole collection.

use std::fmt;

use thiserror::Error;

use crate::certificate::{
    decode_key_certificate, pem_to_der, same_public_key, same_tbs_ignoring_serial, summarize,
    CertificateError,
};
use crate::http::HttpError;
use crate::metadata::{
    KeyRecord, RootSigned, ROLE_ROOT, ROLE_SNAPSHOT, ROLE_TARGETS, ROLE_TIMESTAMP,
};
use crate::notary::NotaryApi;
use crate::signer::SigningIdentity;

#[derive(Debug, Error)]
pub enum ContinuityError {
    #[error("root key type '{keytype}' is not supported; expected a certificate-backed key")]
    UnsupportedKeyType { keytype: String },
    #[error("root certificate could not be compared: {0}")]
    Certificate(#[from] CertificateError),
    #[error("failed to fetch the server-managed {role} key: {source}")]
    ServerKey {
        role: &'static str,
        #[source]
        source: HttpError,
    },
}

/// How much of the published key material survives this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuityDecision {
    Reuse,
    /// Same key, renewed certificate. The prior root key id must co-sign the new root.
    CertUpdate { retired_root_key_id: String },
    FullReset,
}

impl ContinuityDecision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reuse => "reuse",
            Self::CertUpdate { .. } => "cert_update",
            Self::FullReset => "full_reset",
        }
    }
}

impl fmt::Display for ContinuityDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key record bound to each role of the next root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleKeys {
    pub root: KeyRecord,
    pub targets: KeyRecord,
    pub snapshot: KeyRecord,
    pub timestamp: KeyRecord,
}

/// Outcome of continuity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuity {
    pub decision: ContinuityDecision,
    pub keys: RoleKeys,
    /// Version of the prior root, when one was published.
    pub prior_root_version: Option<u64>,
}

/// Classifies the prior root against the candidate certificate (DER).
pub fn decide(
    candidate_der: &[u8],
    prior_root: Option<&RootSigned>,
) -> Result<ContinuityDecision, ContinuityError> {
    let Some(prior_root) = prior_root else {
        return Ok(ContinuityDecision::FullReset);
    };
    let Some((root_key_id, root_key)) = prior_root.role_key(ROLE_ROOT) else {
        tracing::warn!("prior root has no usable root key binding");
        return Ok(ContinuityDecision::FullReset);
    };
    if !root_key.is_certificate() {
        return Err(ContinuityError::UnsupportedKeyType {
            keytype: root_key.keytype.clone(),
        });
    }
    let prior_der = decode_key_certificate(&root_key.keyval.public)?;
    let prior_cert = summarize(&prior_der)?;
    tracing::debug!(
        subject = %prior_cert.subject,
        serial = %prior_cert.serial,
        not_after = %prior_cert.not_after,
        "comparing against prior root certificate"
    );

    let has_server_keys = [ROLE_SNAPSHOT, ROLE_TIMESTAMP]
        .iter()
        .all(|role| prior_root.role_key(role).is_some());
    if same_tbs_ignoring_serial(&prior_der, candidate_der)? {
        if has_server_keys && prior_root.role_key(ROLE_TARGETS).is_some() {
            return Ok(ContinuityDecision::Reuse);
        }
        tracing::warn!("prior root is missing role keys; regenerating trust data");
    } else if same_public_key(&prior_der, candidate_der)? {
        if has_server_keys {
            return Ok(ContinuityDecision::CertUpdate {
                retired_root_key_id: root_key_id.to_string(),
            });
        }
        tracing::warn!("prior root is missing server-managed keys; regenerating trust data");
    }
    Ok(ContinuityDecision::FullReset)
}

/// Decides continuity and gathers the key record for every role.
pub async fn resolve(
    candidate_pem: &str,
    identity: &SigningIdentity,
    prior_root: Option<&RootSigned>,
    notary: &dyn NotaryApi,
) -> Result<Continuity, ContinuityError> {
    let candidate_der = pem_to_der(candidate_pem.as_bytes())?;
    let decision = decide(&candidate_der, prior_root)?;
    let prior_key = |role: &str| {
        prior_root
            .and_then(|root| root.role_key(role))
            .map(|(_, record)| record.clone())
    };

    let keys = match (&decision, prior_root) {
        (ContinuityDecision::Reuse, Some(_)) => PartialRoleKeys {
            root: prior_key(ROLE_ROOT),
            targets: prior_key(ROLE_TARGETS),
            snapshot: prior_key(ROLE_SNAPSHOT),
            timestamp: prior_key(ROLE_TIMESTAMP),
        }
        .complete(),
        (ContinuityDecision::CertUpdate { .. }, Some(_)) => PartialRoleKeys {
            root: Some(KeyRecord::certificate(candidate_pem)),
            targets: Some(identity.key_record()),
            snapshot: prior_key(ROLE_SNAPSHOT),
            timestamp: prior_key(ROLE_TIMESTAMP),
        }
        .complete(),
        _ => None,
    };
    let (decision, keys) = match keys {
        Some(keys) => (decision, keys),
        None => (
            ContinuityDecision::FullReset,
            fresh_keys(candidate_pem, identity, notary).await?,
        ),
    };

    let prior_root_version = prior_root.map(|root| root.version);
    tracing::info!(
        decision = %decision,
        prior_root_version = ?prior_root_version,
        "resolved key continuity"
    );
    Ok(Continuity {
        decision,
        keys,
        prior_root_version,
    })
}

async fn fresh_keys(
    candidate_pem: &str,
    identity: &SigningIdentity,
    notary: &dyn NotaryApi,
) -> Result<RoleKeys, ContinuityError> {
    let server_key = |role: &'static str| async move {
        notary
            .fetch_role_key(role)
            .await
            .map_err(|source| ContinuityError::ServerKey { role, source })
    };
    Ok(RoleKeys {
        root: KeyRecord::certificate(candidate_pem),
        targets: identity.key_record(),
        snapshot: server_key(ROLE_SNAPSHOT).await?,
        timestamp: server_key(ROLE_TIMESTAMP).await?,
    })
}

/// Role keys that may still be missing while being gathered.
struct PartialRoleKeys {
    root: Option<KeyRecord>,
    targets: Option<KeyRecord>,
    snapshot: Option<KeyRecord>,
    timestamp: Option<KeyRecord>,
}

impl PartialRoleKeys {
    fn complete(self) -> Option<RoleKeys> {
        Some(RoleKeys {
            root: self.root?,
            targets: self.targets?,
            snapshot: self.snapshot?,
            timestamp: self.timestamp?,
        })
    }
}
