// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use content_trust_core::{
    targets, HttpClient, HttpError, NotaryClient, PublishError, PublishOutcome, PublishRequest,
    Publisher, RegistryClient, Service, SoftwareSigner, TrustEnv, Validity,
};

use crate::args::Cli;

const EXIT_FATAL: u8 = 1;
const EXIT_USAGE: u8 = 2;

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = cli.apply(TrustEnv::from_os_env());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", env.log_level);
    let filter = match EnvFilter::try_new(&env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("invalid log level '{}': {e}", env.log_level);
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::from(EXIT_FATAL);
    }
    debug!("Logging subsystem enabled");

    match run(&cli, &env).await {
        Ok(outcome) => {
            report(&cli.gun, &outcome);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_usage() => {
            error!("{e}");
            ExitCode::from(EXIT_USAGE)
        }
        Err(e) => {
            error!("Publishing trust data for {} failed: {e}", cli.gun);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: &Cli, env: &TrustEnv) -> Result<PublishOutcome, PublishError> {
    let validity = Validity::new(cli.not_before, cli.not_after)
        .map_err(|e| PublishError::Usage(e.to_string()))?;
    let signer = SoftwareSigner::from_file(&cli.key, validity).await?;

    let credentials = Arc::new(env.credentials());
    let client = |base_url: &str, service| {
        HttpClient::new(base_url, service, credentials.clone(), env.http_options()).map_err(
            |e| match e {
                HttpError::InsecureUrl(_) => PublishError::Usage(format!(
                    "{e}; set CONTENT_TRUST_ALLOW_PLAINTEXT=true to allow it"
                )),
                other => PublishError::Http(other),
            },
        )
    };
    let notary = NotaryClient::new(client(&env.notary_url, Service::Notary)?, cli.gun.as_str());
    let registry = RegistryClient::new(
        client(&env.registry_url, Service::Registry)?,
        cli.repository(),
    );

    let targets = targets::collect(&cli.target_source(), &registry).await?;
    info!(gun = %cli.gun, targets = targets.len(), "collected targets");

    let publisher = Publisher::new(Arc::new(notary), Arc::new(signer), cli.gun.as_str());
    publisher
        .publish(PublishRequest {
            targets,
            mode: cli.targets_mode(),
            dry_run: cli.dry_run,
        })
        .await
}

fn report(gun: &str, outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Unchanged { decision } => {
            info!("Trust data for {gun} is already up to date ({decision})");
        }
        PublishOutcome::Published(summary) => info!(
            "Published trust data for {gun}: root v{}, targets v{} ({})",
            summary.root_version, summary.targets_version, summary.decision
        ),
        PublishOutcome::DryRun(summary) => info!(
            "Dry run for {gun}: would publish root v{}, targets v{} ({}) with {} targets",
            summary.root_version,
            summary.targets_version,
            summary.decision,
            summary.target_names.len()
        ),
    }
}
