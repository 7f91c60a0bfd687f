//! Builds the set of targets to publish.
//!
//! Targets come either from a digest file (`<algo>:<hex> <length> <name>` per
//! line) or from registry manifests fetched by tag. Digests are stored base64
//! encoded, keyed by algorithm, the way TUF targets documents carry them.

use std::path::{Path, PathBuf};

use data_encoding::BASE64;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::http::HttpError;
use crate::metadata::{TargetEntry, TargetMap};
use crate::registry::ManifestSource;

/// Only Docker image manifest schema 2 is publishable.
const SUPPORTED_SCHEMA_VERSION: u64 = 2;
const HASH_ALGORITHM_SHA256: &str = "sha256";

/// Where the target set comes from. The two inputs are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    DigestFile(PathBuf),
    Tags(Vec<String>),
}

#[derive(Debug, Error)]
pub enum TargetsError {
    #[error("digest file line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("manifest for tag '{tag}' has unsupported schema version {found}")]
    UnsupportedSchema { tag: String, found: String },
    #[error("failed to read digest file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch manifest for tag '{tag}': {source}")]
    Http {
        tag: String,
        #[source]
        source: HttpError,
    },
    #[error("no targets to publish")]
    Empty,
}

impl TargetsError {
    /// Errors caused by the caller's input rather than by the outside world.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Parses the contents of a digest file.
pub fn parse_digest_file(contents: &str) -> Result<TargetMap, TargetsError> {
    let mut targets = TargetMap::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, entry) = parse_digest_line(line).map_err(|reason| TargetsError::Parse {
            line: index + 1,
            reason,
        })?;
        targets.insert(name, entry);
    }
    Ok(targets)
}

fn parse_digest_line(line: &str) -> Result<(String, TargetEntry), String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [digest, length, name] = fields.as_slice() else {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    };
    let (algorithm, hex_digest) = digest
        .split_once(':')
        .ok_or_else(|| format!("digest '{digest}' is not of the form <algo>:<hex>"))?;
    if algorithm.is_empty() || hex_digest.is_empty() {
        return Err(format!("digest '{digest}' is not of the form <algo>:<hex>"));
    }
    let raw = hex::decode(hex_digest).map_err(|e| format!("invalid hex digest: {e}"))?;
    let length = length
        .parse::<u64>()
        .map_err(|e| format!("invalid length '{length}': {e}"))?;

    let mut entry = TargetEntry {
        hashes: Default::default(),
        length,
    };
    entry
        .hashes
        .insert(algorithm.to_string(), BASE64.encode(&raw));
    Ok((name.to_string(), entry))
}

pub async fn load_digest_file(path: &Path) -> Result<TargetMap, TargetsError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TargetsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    parse_digest_file(&contents)
}

/// Target entry for a raw manifest, digested over the bytes exactly as served.
pub fn manifest_target(tag: &str, manifest: &[u8]) -> Result<TargetEntry, TargetsError> {
    let schema = serde_json::from_slice::<Value>(manifest)
        .ok()
        .and_then(|value| value.get("schemaVersion").cloned());
    if schema.as_ref().and_then(Value::as_u64) != Some(SUPPORTED_SCHEMA_VERSION) {
        return Err(TargetsError::UnsupportedSchema {
            tag: tag.to_string(),
            found: schema.map_or_else(|| "<missing>".to_string(), |value| value.to_string()),
        });
    }

    let mut entry = TargetEntry {
        hashes: Default::default(),
        length: manifest.len() as u64,
    };
    entry.hashes.insert(
        HASH_ALGORITHM_SHA256.to_string(),
        BASE64.encode(&Sha256::digest(manifest)),
    );
    Ok(entry)
}

/// Resolves `source` into a non-empty target map.
pub async fn collect(
    source: &TargetSource,
    manifests: &dyn ManifestSource,
) -> Result<TargetMap, TargetsError> {
    let targets = match source {
        TargetSource::DigestFile(path) => load_digest_file(path).await?,
        TargetSource::Tags(tags) => {
            let mut targets = TargetMap::new();
            for tag in tags {
                let manifest = manifests.fetch_manifest(tag).await.map_err(|source| {
                    TargetsError::Http {
                        tag: tag.clone(),
                        source,
                    }
                })?;
                let entry = manifest_target(tag, &manifest)?;
                tracing::debug!(tag = %tag, length = entry.length, "resolved manifest target");
                targets.insert(tag.clone(), entry);
            }
            targets
        }
    };
    if targets.is_empty() {
        return Err(TargetsError::Empty);
    }
    Ok(targets)
}
