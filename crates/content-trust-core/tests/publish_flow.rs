//! Publisher runs against an httptest server standing in for notary and registry.

mod common;

use std::sync::Arc;

use common::{notary, one_target, registry, server_key_body, signer};
use content_trust_core::targets::collect;
use content_trust_core::{
    ContinuityDecision, CredentialFactory, HttpError, PublishError, PublishOutcome,
    PublishRequest, Publisher, TargetSource, TargetsMode,
};
use httptest::matchers::{all_of, contains, matches, request};
use httptest::{responders::status_code, Expectation, Server};

const TRUST_BASE: &str = "/v2/docker.io/acme/app/_trust/tuf/";
const TRUST_ROOT: &str = "/v2/docker.io/acme/app/_trust/tuf/root.json";

#[tokio::test]
async fn first_publish_fetches_server_keys_and_uploads() {
    let server = Server::run();
    let manifest = r#"{"schemaVersion":2,"config":{},"layers":[]}"#;
    server.expect(
        Expectation::matching(request::method_path("GET", "/v2/acme/app/manifests/1.0"))
            .respond_with(status_code(200).body(manifest)),
    );
    for path in [
        "/v2/docker.io/acme/app/_trust/tuf/root.json",
        "/v2/docker.io/acme/app/_trust/tuf/targets.json",
    ] {
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", path),
                request::headers(contains(("authorization", "Basic bm90YXJ5"))),
            ])
            .respond_with(status_code(404)),
        );
    }
    for (role, path) in [
        ("snapshot", "/v2/docker.io/acme/app/_trust/tuf/snapshot.key"),
        ("timestamp", "/v2/docker.io/acme/app/_trust/tuf/timestamp.key"),
    ] {
        server.expect(
            Expectation::matching(request::method_path("GET", path))
                .respond_with(status_code(200).body(server_key_body(role))),
        );
    }
    server.expect(
        Expectation::matching(request::method_path("DELETE", TRUST_BASE))
            .respond_with(status_code(200)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", TRUST_BASE),
            request::headers(contains((
                "content-type",
                matches("^multipart/form-data; boundary=[0-9a-f]{64}$")
            ))),
            request::body(matches("filename=\"root\"")),
            request::body(matches("filename=\"targets\"")),
        ])
        .respond_with(status_code(200)),
    );

    let targets = collect(&TargetSource::Tags(vec!["1.0".into()]), &registry(&server))
        .await
        .expect("targets");
    let credentials = CredentialFactory::new_static(Some("Basic bm90YXJ5".into()), None);
    let publisher = Publisher::new(
        Arc::new(notary(&server, credentials)),
        Arc::new(signer()),
        common::GUN,
    );

    let outcome = publisher
        .publish(PublishRequest {
            targets,
            mode: TargetsMode::Replace,
            dry_run: false,
        })
        .await
        .expect("publish");

    match outcome {
        PublishOutcome::Published(summary) => {
            assert_eq!(summary.decision, ContinuityDecision::FullReset);
            assert_eq!(summary.root_version, 1);
            assert_eq!(summary.targets_version, 1);
            assert_eq!(summary.target_names, vec!["1.0".to_string()]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn server_error_on_root_lookup_aborts_without_mutation() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", TRUST_ROOT))
            .respond_with(status_code(500)),
    );

    let publisher = Publisher::new(
        Arc::new(notary(&server, CredentialFactory::Anonymous)),
        Arc::new(signer()),
        common::GUN,
    );
    let err = publisher
        .publish(PublishRequest {
            targets: one_target(),
            mode: TargetsMode::Replace,
            dry_run: false,
        })
        .await
        .expect_err("publish must fail");

    assert!(matches!(
        err,
        PublishError::Notary {
            source: HttpError::Server(500),
            ..
        }
    ));
    assert!(!err.is_usage());
}

#[tokio::test]
async fn rejected_credentials_surface_as_unauthorized() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", TRUST_ROOT))
            .respond_with(status_code(401)),
    );

    let publisher = Publisher::new(
        Arc::new(notary(&server, CredentialFactory::Anonymous)),
        Arc::new(signer()),
        common::GUN,
    );
    let err = publisher
        .publish(PublishRequest {
            targets: one_target(),
            mode: TargetsMode::AddOnly,
            dry_run: true,
        })
        .await
        .expect_err("publish must fail");

    assert!(matches!(
        err,
        PublishError::Notary {
            source: HttpError::Unauthorized,
            ..
        }
    ));
}
