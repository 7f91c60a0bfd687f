//! Shared fixtures for the notary integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use content_trust_core::targets::parse_digest_file;
use content_trust_core::{
    CredentialFactory, HttpClient, HttpClientOptions, KeyRecord, NotaryClient, RegistryClient,
    Service, SoftwareSigner, TargetMap, Validity,
};
use httptest::Server;
use time::macros::datetime;

pub const GUN: &str = "docker.io/acme/app";
pub const REPOSITORY: &str = "acme/app";

/// Signer over a freshly generated P-256 key.
pub fn signer() -> SoftwareSigner {
    let pem = rcgen::KeyPair::generate()
        .expect("generate key")
        .serialize_pem();
    let validity = Validity::new(
        datetime!(2024-01-01 0:00 UTC),
        Some(datetime!(2034-01-01 0:00 UTC)),
    )
    .expect("validity");
    SoftwareSigner::from_pkcs8_pem(&pem, validity).expect("signer")
}

fn http(server: &Server, service: Service, credentials: CredentialFactory) -> HttpClient {
    HttpClient::new(
        server.url_str(""),
        service,
        Arc::new(credentials),
        HttpClientOptions {
            allow_plaintext: true,
            ..Default::default()
        },
    )
    .expect("http client")
}

pub fn notary(server: &Server, credentials: CredentialFactory) -> NotaryClient {
    NotaryClient::new(http(server, Service::Notary, credentials), GUN)
}

pub fn registry(server: &Server) -> RegistryClient {
    RegistryClient::new(
        http(server, Service::Registry, CredentialFactory::Anonymous),
        REPOSITORY,
    )
}

/// One digest-file target, for runs that fail before targets matter.
pub fn one_target() -> TargetMap {
    parse_digest_file("sha256:abcd 10 1.0\n").expect("digest line")
}

/// JSON body of a server-managed role key.
pub fn server_key_body(role: &str) -> String {
    serde_json::to_string(&KeyRecord::public_key(format!("server-{role}").as_bytes()))
        .expect("encode key")
}
