// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use content_trust_core::{TargetSource, TargetsMode, TrustEnv};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "content-trust",
    version,
    about = "Publish signed trust data for container image tags",
    group(ArgGroup::new("input").required(true).args(["digest_file", "tags"]))
)]
pub struct Cli {
    /// Globally unique name of the repository, e.g. docker.io/acme/app.
    #[arg(long)]
    pub gun: String,

    /// PKCS#8 PEM file holding the ECDSA P-256 signing key.
    #[arg(long)]
    pub key: PathBuf,

    /// Start of the signing certificate's validity (RFC 3339).
    #[arg(long, value_parser = parse_timestamp)]
    pub not_before: OffsetDateTime,

    /// End of the signing certificate's validity (RFC 3339).
    /// Defaults to ten years after --not-before.
    #[arg(long, value_parser = parse_timestamp)]
    pub not_after: Option<OffsetDateTime>,

    /// File of `<algo>:<hex> <length> <name>` lines to publish instead of registry tags.
    #[arg(long)]
    pub digest_file: Option<PathBuf>,

    /// Image tags whose manifests are published.
    pub tags: Vec<String>,

    /// Registry repository path; derived from --gun when omitted.
    #[arg(long)]
    pub repository: Option<String>,

    /// Keep every published target and add or override the given ones.
    #[arg(long)]
    pub add_only: bool,

    /// Build and sign the documents without touching the notary.
    #[arg(long)]
    pub dry_run: bool,

    /// Notary base URL (overrides NOTARY_SERVER_URL).
    #[arg(long)]
    pub notary_url: Option<String>,

    /// Registry base URL (overrides REGISTRY_URL).
    #[arg(long)]
    pub registry_url: Option<String>,

    /// Log filter (overrides CONTENT_TRUST_LOG_LEVEL).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Layers command-line overrides on top of environment settings.
    pub fn apply(&self, mut env: TrustEnv) -> TrustEnv {
        if let Some(url) = &self.notary_url {
            env.notary_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.registry_url {
            env.registry_url = url.trim_end_matches('/').to_string();
        }
        if let Some(level) = &self.log_level {
            env.log_level = level.to_lowercase();
        }
        env
    }

    pub fn target_source(&self) -> TargetSource {
        match &self.digest_file {
            Some(path) => TargetSource::DigestFile(path.clone()),
            None => TargetSource::Tags(self.tags.clone()),
        }
    }

    pub fn targets_mode(&self) -> TargetsMode {
        if self.add_only {
            TargetsMode::AddOnly
        } else {
            TargetsMode::Replace
        }
    }

    pub fn repository(&self) -> String {
        self.repository
            .clone()
            .unwrap_or_else(|| content_trust_core::registry_repository(&self.gun))
    }
}

fn parse_timestamp(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}
