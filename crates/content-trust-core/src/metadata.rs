//! TUF metadata shapes exchanged with the notary service.
//!
//! Every document published by this crate is serialised through
//! [`canonical_json`], and key identifiers are the SHA-256 of a key record's
//! canonical encoding. Using the same encoder for hashing, signing and upload
//! keeps key ids and signatures stable across runs.

use std::collections::BTreeMap;

use data_encoding::BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Role name of the root document.
pub const ROLE_ROOT: &str = "root";
/// Role name of the targets document.
pub const ROLE_TARGETS: &str = "targets";
/// Role name of the server-managed snapshot document.
pub const ROLE_SNAPSHOT: &str = "snapshot";
/// Role name of the server-managed timestamp document.
pub const ROLE_TIMESTAMP: &str = "timestamp";

/// Key type of a certificate-backed key (public value is a base64 PEM certificate).
pub const KEY_TYPE_ECDSA_X509: &str = "ecdsa-x509";
/// Key type of a raw ECDSA key (public value is base64 SPKI DER).
pub const KEY_TYPE_ECDSA: &str = "ecdsa";
/// Signature method tag written next to every ECDSA signature.
pub const SIGNATURE_METHOD_ECDSA: &str = "ecdsa";

const TYPE_ROOT: &str = "Root";
const TYPE_TARGETS: &str = "Targets";

/// Errors raised while encoding or decoding metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to encode canonical json: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode {role} metadata: {source}")]
    Decode {
        role: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A public key as it appears in a root document's `keys` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub keytype: String,
    pub keyval: KeyValue,
}

/// Key material of a [`KeyRecord`]. The private half is always `null` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub public: String,
    #[serde(default)]
    pub private: Option<String>,
}

impl KeyRecord {
    /// Wraps a PEM certificate into a certificate-backed key record.
    pub fn certificate(pem: &str) -> Self {
        Self::new(KEY_TYPE_ECDSA_X509, BASE64.encode(pem.as_bytes()))
    }

    /// Wraps SPKI DER bytes into a raw ECDSA key record.
    pub fn public_key(spki_der: &[u8]) -> Self {
        Self::new(KEY_TYPE_ECDSA, BASE64.encode(spki_der))
    }

    fn new(keytype: &str, public: String) -> Self {
        Self {
            keytype: keytype.to_string(),
            keyval: KeyValue {
                public,
                private: None,
            },
        }
    }

    pub fn is_certificate(&self) -> bool {
        self.keytype == KEY_TYPE_ECDSA_X509
    }

    /// Hex SHA-256 over the canonical encoding of the record.
    pub fn key_id(&self) -> Result<String, MetadataError> {
        let encoded = canonical_json(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

/// Keys and threshold bound to one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub keyids: Vec<String>,
    pub threshold: u32,
}

impl RoleBinding {
    /// Single-key binding; multi-key quorums are never produced.
    pub fn single(key_id: String) -> Self {
        Self {
            keyids: vec![key_id],
            threshold: 1,
        }
    }
}

/// Signed portion of a root document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootSigned {
    #[serde(rename = "_type")]
    pub type_tag: String,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub expires: String,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyRecord>,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleBinding>,
    pub version: u64,
}

impl RootSigned {
    pub fn new(
        expires: String,
        keys: BTreeMap<String, KeyRecord>,
        roles: BTreeMap<String, RoleBinding>,
        version: u64,
    ) -> Self {
        Self {
            type_tag: TYPE_ROOT.to_string(),
            consistent_snapshot: false,
            expires,
            keys,
            roles,
            version,
        }
    }

    /// Returns the first key bound to `role` together with its id, when both exist.
    pub fn role_key(&self, role: &str) -> Option<(&str, &KeyRecord)> {
        let key_id = self.roles.get(role)?.keyids.first()?;
        self.keys
            .get(key_id)
            .map(|record| (key_id.as_str(), record))
    }
}

/// Digests and length of one published target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Base64 digests keyed by algorithm (e.g. `sha256`).
    pub hashes: BTreeMap<String, String>,
    pub length: u64,
}

/// Mapping from target name (image tag) to its entry.
pub type TargetMap = BTreeMap<String, TargetEntry>;

/// Delegation section of a targets document. Always empty when produced here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    #[serde(default)]
    pub keys: BTreeMap<String, KeyRecord>,
    #[serde(default)]
    pub roles: Vec<Value>,
}

/// Signed portion of a targets document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsSigned {
    #[serde(rename = "_type")]
    pub type_tag: String,
    #[serde(default)]
    pub delegations: Delegations,
    pub expires: String,
    #[serde(default)]
    pub targets: TargetMap,
    pub version: u64,
}

impl TargetsSigned {
    pub fn new(expires: String, targets: TargetMap, version: u64) -> Self {
        Self {
            type_tag: TYPE_TARGETS.to_string(),
            delegations: Delegations::default(),
            expires,
            targets,
            version,
        }
    }
}

/// One signature over the canonical encoding of a `signed` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub method: String,
    pub sig: String,
}

/// Envelope pairing a document with its signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signed: T,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

/// Serialises `value` as canonical JSON (sorted keys, no insignificant whitespace).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, MetadataError> {
    serde_jcs::to_vec(value).map_err(MetadataError::Encode)
}

/// Parses a signed envelope fetched for `role`.
pub fn parse_signed<T: DeserializeOwned>(
    role: &str,
    bytes: &[u8],
) -> Result<Signed<T>, MetadataError> {
    serde_json::from_slice(bytes).map_err(|source| MetadataError::Decode {
        role: role.to_string(),
        source,
    })
}
