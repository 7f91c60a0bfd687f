//! Structural comparison of X.509 certificates embedded in root keys.
//!
//! Continuity checks compare the to-be-signed (TBS) part of two certificates
//! element by element with the serial number removed, so a renewed
//! certificate with a fresh serial but otherwise identical content is still
//! recognised as the same signer.

use data_encoding::BASE64;
use der::asn1::AnyRef;
use der::{Decode, Encode, Reader, SliceReader, Tag, Tagged};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

const PEM_LABEL_CERTIFICATE: &str = "CERTIFICATE";

/// Number of TBS elements between the serial number and the SPKI
/// (signature algorithm, issuer, validity, subject).
const SERIAL_TO_SPKI_OFFSET: usize = 5;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate key value is not valid base64: {0}")]
    Base64(#[from] data_encoding::DecodeError),
    #[error("certificate PEM could not be decoded: {0}")]
    Pem(String),
    #[error("certificate could not be parsed: {0}")]
    X509(String),
    #[error("malformed certificate structure: {0}")]
    Structure(#[from] der::Error),
    #[error("certificate TBS is missing its {0}")]
    MissingField(&'static str),
}

/// One top-level element of a TBS certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbsField {
    pub tag: Tag,
    pub value: Vec<u8>,
}

/// Human-readable facts about a certificate, used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub serial: String,
    pub not_after: String,
}

/// Decodes the public value of an `ecdsa-x509` key record (base64 PEM) into DER.
pub fn decode_key_certificate(public: &str) -> Result<Vec<u8>, CertificateError> {
    let pem = BASE64.decode(public.as_bytes())?;
    pem_to_der(&pem)
}

/// Extracts the DER body of a PEM-encoded certificate.
pub fn pem_to_der(pem: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| CertificateError::Pem(e.to_string()))?;
    if pem.label != PEM_LABEL_CERTIFICATE {
        return Err(CertificateError::Pem(format!(
            "unexpected PEM label '{}'",
            pem.label
        )));
    }
    Ok(pem.contents)
}

/// Returns the TBS elements of `cert_der` with the serial number removed.
pub fn tbs_without_serial(cert_der: &[u8]) -> Result<Vec<TbsField>, CertificateError> {
    let fields = tbs_fields(cert_der)?;
    let serial = serial_index(&fields)?;
    Ok(fields
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != serial)
        .map(|(_, field)| TbsField {
            tag: field.tag(),
            value: field.value().to_vec(),
        })
        .collect())
}

/// True when both certificates have identical TBS content apart from the serial.
pub fn same_tbs_ignoring_serial(a: &[u8], b: &[u8]) -> Result<bool, CertificateError> {
    Ok(tbs_without_serial(a)? == tbs_without_serial(b)?)
}

/// Returns the DER encoding of the certificate's SubjectPublicKeyInfo.
pub fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>, CertificateError> {
    let fields = tbs_fields(cert_der)?;
    let spki = fields
        .get(serial_index(&fields)? + SERIAL_TO_SPKI_OFFSET)
        .filter(|field| field.tag() == Tag::Sequence)
        .ok_or(CertificateError::MissingField("subject public key info"))?;
    Ok(spki.to_der()?)
}

/// True when both certificates wrap the same public key.
pub fn same_public_key(a: &[u8], b: &[u8]) -> Result<bool, CertificateError> {
    Ok(subject_public_key_info(a)? == subject_public_key_info(b)?)
}

pub fn summarize(cert_der: &[u8]) -> Result<CertificateSummary, CertificateError> {
    let (_, cert) =
        X509Certificate::from_der(cert_der).map_err(|e| CertificateError::X509(e.to_string()))?;
    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        serial: cert.raw_serial_as_string(),
        not_after: cert.validity().not_after.to_string(),
    })
}

/// Splits the TBS certificate of `cert_der` into its top-level elements.
fn tbs_fields(cert_der: &[u8]) -> Result<Vec<AnyRef<'_>>, CertificateError> {
    let certificate = children(AnyRef::from_der(cert_der)?)?;
    let tbs = certificate
        .first()
        .copied()
        .ok_or(CertificateError::MissingField("to-be-signed section"))?;
    children(tbs)
}

/// Position of the serial INTEGER, which follows the optional `[0]` version.
fn serial_index(fields: &[AnyRef<'_>]) -> Result<usize, CertificateError> {
    let index = match fields.first() {
        Some(first) if first.tag().is_context_specific() => 1,
        _ => 0,
    };
    match fields.get(index) {
        Some(field) if field.tag() == Tag::Integer => Ok(index),
        _ => Err(CertificateError::MissingField("serial number")),
    }
}

fn children(node: AnyRef<'_>) -> Result<Vec<AnyRef<'_>>, CertificateError> {
    if node.tag() != Tag::Sequence {
        let error = node.tag().unexpected_error(Some(Tag::Sequence));
        return Err(CertificateError::Structure(error));
    }
    let mut reader = SliceReader::new(node.value())?;
    let mut elements = Vec::new();
    while !reader.is_finished() {
        elements.push(AnyRef::decode(&mut reader)?);
    }
    Ok(elements)
}
