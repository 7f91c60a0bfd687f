//! Public entry points for the content-trust core crate.
//!
//! The crate reconciles the trust data a notary holds for one repository
//! with a local signing key: it decides whether the published keys can be
//! reused, builds the next root and targets documents, and uploads them
//! only when something changed.

pub mod certificate;
pub mod config;
pub mod continuity;
pub mod credentials;
pub mod documents;
pub mod guard;
pub mod http;
pub mod metadata;
pub mod notary;
pub mod publish;
pub mod registry;
pub mod signer;
pub mod targets;

pub use config::{registry_repository, TrustEnv};
pub use continuity::{Continuity, ContinuityDecision, ContinuityError, RoleKeys};
pub use credentials::{CredentialFactory, Service};
pub use documents::{DocumentError, TargetsMode};
pub use http::{HttpClient, HttpClientOptions, HttpError};
pub use metadata::{KeyRecord, RootSigned, Signed, TargetEntry, TargetMap, TargetsSigned};
pub use notary::{NotaryApi, NotaryClient};
pub use publish::{PublishError, PublishOutcome, PublishRequest, PublishSummary, Publisher};
pub use registry::{ManifestSource, RegistryClient};
pub use signer::{SignerError, SigningIdentity, SoftwareSigner, TrustSigner, Validity};
pub use targets::{TargetSource, TargetsError};
