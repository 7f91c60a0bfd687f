//! Signing identity and the signer collaborator.
//!
//! The reconciliation engine only needs three things from key material: the
//! public identity it represents, a certificate minted for that identity, and
//! signatures over canonical payloads. [`TrustSigner`] is that seam;
//! [`SoftwareSigner`] backs it with a local ECDSA P-256 PKCS#8 key.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey};
use p256::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::metadata::{KeyRecord, KEY_TYPE_ECDSA};

/// Lifetime applied when no explicit `not_after` is configured.
pub const DEFAULT_KEY_VALIDITY: Duration = Duration::days(3650);

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid signing key: {0}")]
    Key(String),
    #[error("failed to read signing key: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),
    #[error("invalid validity window: not_after {not_after} is not after not_before {not_before}")]
    Validity {
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    },
    #[error("validity bound {0} is out of range")]
    ValidityOutOfRange(OffsetDateTime),
}

/// Validity window of the signing identity, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Builds a window starting at `not_before`, defaulting the end to
    /// [`DEFAULT_KEY_VALIDITY`] later. Both bounds are normalised to UTC and
    /// drop sub-second precision so the certificate template is identical
    /// across runs.
    pub fn new(
        not_before: OffsetDateTime,
        not_after: Option<OffsetDateTime>,
    ) -> Result<Self, SignerError> {
        let not_before = utc_whole_seconds(not_before)?;
        let not_after = match not_after {
            Some(not_after) => not_after,
            None => not_before
                .checked_add(DEFAULT_KEY_VALIDITY)
                .ok_or(SignerError::ValidityOutOfRange(not_before))?,
        };
        let not_after = utc_whole_seconds(not_after)?;
        if not_after <= not_before {
            return Err(SignerError::Validity {
                not_before,
                not_after,
            });
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }
}

/// Drops the sub-second component of a timestamp.
pub fn whole_seconds(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(0).unwrap_or(at)
}

fn utc_whole_seconds(at: OffsetDateTime) -> Result<OffsetDateTime, SignerError> {
    at.checked_to_offset(UtcOffset::UTC)
        .map(whole_seconds)
        .ok_or(SignerError::ValidityOutOfRange(at))
}

/// Public identity of the key that signs this run's documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    /// SubjectPublicKeyInfo DER of the signing key.
    pub public_key: Vec<u8>,
    pub algorithm: &'static str,
    pub validity: Validity,
}

impl SigningIdentity {
    /// Raw (certificate-less) key record for this identity, used for the targets role.
    pub fn key_record(&self) -> KeyRecord {
        KeyRecord::public_key(&self.public_key)
    }
}

#[async_trait]
pub trait TrustSigner: Send + Sync {
    fn identity(&self) -> &SigningIdentity;

    /// Mints a certificate for the identity with subject CN = `gun`.
    fn issue_certificate(&self, gun: &str) -> Result<String, SignerError>;

    /// Signs `payload`, returning the fixed-width `r || s` encoding.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// [`TrustSigner`] over a local ECDSA P-256 key.
pub struct SoftwareSigner {
    signing_key: SigningKey,
    certificate_key: KeyPair,
    identity: SigningIdentity,
}

impl SoftwareSigner {
    /// Loads a PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str, validity: Validity) -> Result<Self, SignerError> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| SignerError::Key(e.to_string()))?;
        let certificate_key = KeyPair::from_pem(pem)?;
        let public_key = signing_key
            .verifying_key()
            .to_public_key_der()
            .map_err(|e| SignerError::Key(e.to_string()))?
            .into_vec();
        Ok(Self {
            signing_key,
            certificate_key,
            identity: SigningIdentity {
                public_key,
                algorithm: KEY_TYPE_ECDSA,
                validity,
            },
        })
    }

    pub async fn from_file(
        path: impl AsRef<Path>,
        validity: Validity,
    ) -> Result<Self, SignerError> {
        let pem = tokio::fs::read_to_string(path).await?;
        Self::from_pkcs8_pem(&pem, validity)
    }
}

impl Debug for SoftwareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSigner")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TrustSigner for SoftwareSigner {
    fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    fn issue_certificate(&self, gun: &str) -> Result<String, SignerError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, gun);
        params.distinguished_name = subject;
        params.not_before = self.identity.validity.not_before;
        params.not_after = self.identity.validity.not_after;
        params.serial_number = Some(random_serial());
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
        params.is_ca = IsCa::ExplicitNoCa;
        let certificate = params.self_signed(&self.certificate_key)?;
        Ok(certificate.pem())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature: EcdsaSignature = self.signing_key.sign(payload);
        Ok(signature.to_bytes().to_vec())
    }
}

/// 128-bit positive serial with the top bits pinned so its DER width never changes.
fn random_serial() -> SerialNumber {
    let mut bytes: [u8; 16] = rand::random();
    bytes[0] = (bytes[0] & 0x3f) | 0x40;
    SerialNumber::from_slice(&bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::certificate::{pem_to_der, same_tbs_ignoring_serial, subject_public_key_info};
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;
    use p256::pkcs8::DecodePublicKey;
    use time::macros::datetime;

    pub(crate) fn test_key_pem() -> String {
        KeyPair::generate().unwrap().serialize_pem()
    }

    pub(crate) fn test_validity() -> Validity {
        Validity::new(
            datetime!(2024-01-01 0:00 UTC),
            Some(datetime!(2034-01-01 0:00 UTC)),
        )
        .unwrap()
    }

    pub(crate) fn test_signer() -> SoftwareSigner {
        SoftwareSigner::from_pkcs8_pem(&test_key_pem(), test_validity()).unwrap()
    }

    #[test]
    fn validity_defaults_and_truncates() {
        let validity = Validity::new(datetime!(2024-01-01 0:00:00.75 UTC), None).unwrap();
        assert_eq!(validity.not_before, datetime!(2024-01-01 0:00 UTC));
        assert_eq!(
            validity.not_after,
            datetime!(2024-01-01 0:00 UTC) + DEFAULT_KEY_VALIDITY
        );
    }

    #[test]
    fn validity_normalises_to_utc() {
        let validity = Validity::new(
            datetime!(2024-01-01 2:00 +02:00),
            Some(datetime!(2030-06-01 12:00 -05:00)),
        )
        .unwrap();
        assert_eq!(validity.not_before, datetime!(2024-01-01 0:00 UTC));
        assert_eq!(validity.not_after, datetime!(2030-06-01 17:00 UTC));
        assert_eq!(validity.not_after.offset(), UtcOffset::UTC);
    }

    #[test]
    fn validity_rejects_bounds_outside_the_calendar() {
        let err = Validity::new(datetime!(9995-01-01 0:00 UTC), None).unwrap_err();
        assert!(matches!(err, SignerError::ValidityOutOfRange(_)));

        let err = Validity::new(
            datetime!(2024-01-01 0:00 UTC),
            Some(datetime!(9999-12-31 23:00 -05:00)),
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::ValidityOutOfRange(_)));
    }

    #[test]
    fn validity_rejects_inverted_window() {
        let err = Validity::new(
            datetime!(2024-01-01 0:00 UTC),
            Some(datetime!(2023-01-01 0:00 UTC)),
        )
        .unwrap_err();
        assert!(matches!(err, SignerError::Validity { .. }));
    }

    #[test]
    fn rejects_garbage_key() {
        let err = SoftwareSigner::from_pkcs8_pem("not a key", test_validity()).unwrap_err();
        assert!(matches!(err, SignerError::Key(_)));
    }

    #[test]
    fn certificates_differ_only_by_serial() {
        let signer = test_signer();
        let first = pem_to_der(signer.issue_certificate("docker.io/acme/app").unwrap().as_bytes())
            .unwrap();
        let second = pem_to_der(signer.issue_certificate("docker.io/acme/app").unwrap().as_bytes())
            .unwrap();

        assert_ne!(first, second);
        assert!(same_tbs_ignoring_serial(&first, &second).unwrap());
        assert_eq!(
            subject_public_key_info(&first).unwrap(),
            signer.identity().public_key
        );
    }

    #[tokio::test]
    async fn signatures_verify_against_identity() {
        let signer = test_signer();
        let signature = signer.sign(b"payload").await.unwrap();
        assert_eq!(signature.len(), 64);

        let verifying_key =
            VerifyingKey::from_public_key_der(&signer.identity().public_key).unwrap();
        let signature = EcdsaSignature::from_slice(&signature).unwrap();
        assert!(verifying_key.verify(b"payload", &signature).is_ok());
    }

    #[tokio::test]
    async fn loads_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.pem");
        std::fs::write(&path, test_key_pem()).unwrap();

        let signer = SoftwareSigner::from_file(&path, test_validity()).await.unwrap();
        assert_eq!(signer.identity().algorithm, KEY_TYPE_ECDSA);
        assert_eq!(signer.identity().key_record().keytype, KEY_TYPE_ECDSA);
    }
}
