//! Publish orchestration.
//!
//! One run reads the published root and targets, resolves key continuity,
//! builds and signs the next documents and uploads them in a single multipart
//! request. A full reset purges the collection before the upload. Nothing is
//! retried; a failed run can simply be repeated.

use std::sync::Arc;

use data_encoding::BASE64;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;

use crate::continuity::{self, ContinuityDecision, ContinuityError};
use crate::documents::{self, DocumentError, TargetsMode};
use crate::guard::{self, PublishPlan};
use crate::http::{optional, HttpError};
use crate::metadata::{
    canonical_json, parse_signed, MetadataError, RootSigned, Signature, Signed, TargetMap,
    TargetsSigned, ROLE_ROOT, ROLE_TARGETS, SIGNATURE_METHOD_ECDSA,
};
use crate::notary::NotaryApi;
use crate::signer::{SignerError, TrustSigner};
use crate::targets::TargetsError;

const MULTIPART_FIELD_NAME: &str = "files";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid invocation: {0}")]
    Usage(String),
    #[error("notary request to {operation} failed: {source}")]
    Notary {
        operation: &'static str,
        #[source]
        source: HttpError,
    },
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Targets(#[from] TargetsError),
    #[error(transparent)]
    Continuity(#[from] ContinuityError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl PublishError {
    /// True when the failure stems from how the tool was invoked.
    pub fn is_usage(&self) -> bool {
        match self {
            Self::Usage(_) => true,
            Self::Targets(err) => err.is_usage(),
            _ => false,
        }
    }

    fn notary(operation: &'static str) -> impl FnOnce(HttpError) -> Self {
        move |source| Self::Notary { operation, source }
    }
}

/// What to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub targets: TargetMap,
    pub mode: TargetsMode,
    /// Build and sign everything, but leave the notary untouched.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub decision: ContinuityDecision,
    pub root_version: u64,
    pub targets_version: u64,
    pub target_names: Vec<String>,
    pub boundary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Published state already matches the request.
    Unchanged { decision: ContinuityDecision },
    Published(PublishSummary),
    DryRun(PublishSummary),
}

/// Documents of one upload, in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<(String, Vec<u8>)>,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `(role, payload)` pairs.
    pub fn parts(&self) -> &[(String, Vec<u8>)] {
        &self.parts
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (role, payload) in &self.parts {
            let disposition = format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                self.boundary, MULTIPART_FIELD_NAME, role
            );
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(payload);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

/// Wraps `parts` in a body whose boundary is the hex SHA-256 of all payloads.
pub fn encode_multipart(parts: Vec<(String, Vec<u8>)>) -> MultipartBody {
    let mut hasher = Sha256::new();
    for (_, payload) in &parts {
        hasher.update(payload);
    }
    MultipartBody {
        boundary: hex::encode(hasher.finalize()),
        parts,
    }
}

/// Drives one publish against a notary collection.
pub struct Publisher {
    notary: Arc<dyn NotaryApi>,
    signer: Arc<dyn TrustSigner>,
    gun: String,
}

impl Publisher {
    pub fn new(
        notary: Arc<dyn NotaryApi>,
        signer: Arc<dyn TrustSigner>,
        gun: impl Into<String>,
    ) -> Self {
        Self {
            notary,
            signer,
            gun: gun.into(),
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome, PublishError> {
        self.publish_at(request, OffsetDateTime::now_utc()).await
    }

    /// Same as [`Publisher::publish`] with an explicit clock.
    pub async fn publish_at(
        &self,
        request: PublishRequest,
        now: OffsetDateTime,
    ) -> Result<PublishOutcome, PublishError> {
        if request.targets.is_empty() {
            return Err(TargetsError::Empty.into());
        }
        let prior_root = self.fetch_prior::<RootSigned>(ROLE_ROOT).await?;
        let candidate = self.signer.issue_certificate(&self.gun)?;
        let continuity = continuity::resolve(
            &candidate,
            self.signer.identity(),
            prior_root.as_ref().map(|root| &root.signed),
            self.notary.as_ref(),
        )
        .await?;

        let prior_targets = self.fetch_prior::<TargetsSigned>(ROLE_TARGETS).await?;
        let prior_map = prior_targets.as_ref().map(|doc| &doc.signed.targets);
        let assembled = documents::assemble_targets(request.targets, prior_map, request.mode);
        if guard::plan(&continuity.decision, &assembled, prior_map) == PublishPlan::Skip {
            tracing::info!(gun = %self.gun, "published trust data is up to date");
            return Ok(PublishOutcome::Unchanged {
                decision: continuity.decision,
            });
        }

        let root = documents::build_root(&continuity, self.signer.identity())?;
        let target_names = assembled.keys().cloned().collect();
        let targets = documents::build_targets(
            assembled,
            prior_targets.as_ref().map(|doc| doc.signed.version),
            now,
        )?;

        if continuity.decision == ContinuityDecision::FullReset && !request.dry_run {
            tracing::info!(gun = %self.gun, "deleting existing trust data before full reset");
            self.notary
                .delete_trust_data()
                .await
                .map_err(PublishError::notary("delete trust data"))?;
        }

        let mut root_key_ids = vec![continuity.keys.root.key_id()?];
        if let ContinuityDecision::CertUpdate {
            retired_root_key_id,
        } = &continuity.decision
        {
            root_key_ids.push(retired_root_key_id.clone());
        }
        let targets_key_ids = [continuity.keys.targets.key_id()?];

        let summary_versions = (root.version, targets.version);
        let signed_root = self.sign_document(root, &root_key_ids).await?;
        let signed_targets = self.sign_document(targets, &targets_key_ids).await?;
        let body = encode_multipart(vec![
            (ROLE_ROOT.to_string(), canonical_json(&signed_root)?),
            (ROLE_TARGETS.to_string(), canonical_json(&signed_targets)?),
        ]);

        let summary = PublishSummary {
            decision: continuity.decision,
            root_version: summary_versions.0,
            targets_version: summary_versions.1,
            target_names,
            boundary: body.boundary().to_string(),
        };
        if request.dry_run {
            tracing::info!(
                gun = %self.gun,
                decision = %summary.decision,
                root_version = summary.root_version,
                targets_version = summary.targets_version,
                "dry run; skipping upload"
            );
            return Ok(PublishOutcome::DryRun(summary));
        }

        self.notary
            .upload(&body)
            .await
            .map_err(PublishError::notary("upload trust data"))?;
        tracing::info!(
            gun = %self.gun,
            decision = %summary.decision,
            root_version = summary.root_version,
            targets_version = summary.targets_version,
            targets = summary.target_names.len(),
            "published trust data"
        );
        Ok(PublishOutcome::Published(summary))
    }

    /// Signs the canonical encoding of `document` once, recording it under every key id.
    pub async fn sign_document<T: Serialize + Send>(
        &self,
        document: T,
        key_ids: &[String],
    ) -> Result<Signed<T>, PublishError> {
        let payload = canonical_json(&document)?;
        let sig = BASE64.encode(&self.signer.sign(&payload).await?);
        let signatures = key_ids
            .iter()
            .map(|keyid| Signature {
                keyid: keyid.clone(),
                method: SIGNATURE_METHOD_ECDSA.to_string(),
                sig: sig.clone(),
            })
            .collect();
        Ok(Signed {
            signed: document,
            signatures,
        })
    }

    async fn fetch_prior<T: serde::de::DeserializeOwned>(
        &self,
        role: &'static str,
    ) -> Result<Option<Signed<T>>, PublishError> {
        let operation = if role == ROLE_ROOT {
            "fetch root"
        } else {
            "fetch targets"
        };
        let Some(bytes) = optional(self.notary.fetch_metadata(role).await)
            .map_err(PublishError::notary(operation))?
        else {
            tracing::debug!(gun = %self.gun, role, "no published document");
            return Ok(None);
        };
        Ok(Some(parse_signed(role, &bytes)?))
    }
}
