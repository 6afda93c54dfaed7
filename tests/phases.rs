//! Phase configuration tests against the fake factory.

use std::sync::Arc;

use buildpack_lifecycle::auth::{AnonymousKeychain, Keychain};
use buildpack_lifecycle::build::fakes::{FakeKeychain, FakePhase, FakePhaseFactory, FakeRuntime};
use buildpack_lifecycle::build::{Lifecycle, PhaseConfigProvider, RunContext};
use buildpack_lifecycle::config::LifecycleConfig;
use buildpack_lifecycle::error::{ConfigOpError, PhaseError};
use buildpack_lifecycle::logging::TracingLogger;

const DOCKER_SOCKET: &str = "/var/run/docker.sock:/var/run/docker.sock";

fn lifecycle_with(version: &str, verbose: bool, keychain: Arc<dyn Keychain>) -> Lifecycle {
    Lifecycle::new(
        LifecycleConfig::new("some-builder").with_lifecycle_version(version),
        Arc::new(FakeRuntime::new()),
        Arc::new(TracingLogger::new(verbose)),
        keychain,
    )
    .expect("lifecycle should build")
}

fn verbose_lifecycle() -> Lifecycle {
    lifecycle_with("0.4.1", true, Arc::new(AnonymousKeychain))
}

fn ctx() -> RunContext {
    RunContext::background()
}

fn provider(factory: &FakePhaseFactory) -> PhaseConfigProvider {
    factory
        .new_called_with_provider()
        .expect("factory should have been called")
}

fn argv(provider: &PhaseConfigProvider) -> &[String] {
    &provider.container_config().cmd
}

/// True when `expected` appears in `actual` as a contiguous run.
fn has_sequence(actual: &[String], expected: &[&str]) -> bool {
    actual
        .windows(expected.len())
        .any(|window| window.iter().zip(expected).all(|(a, e)| a == e))
}

fn assert_sequences(actual: &[String], expected: &[&[&str]]) {
    for seq in expected {
        assert!(
            has_sequence(actual, seq),
            "expected {seq:?} in {actual:?}"
        );
    }
}

fn has(values: &[String], expected: &str) -> bool {
    values.iter().any(|v| v == expected)
}

fn has_registry_auth(provider: &PhaseConfigProvider) -> bool {
    provider
        .container_config()
        .env
        .iter()
        .any(|e| e.starts_with("CNB_REGISTRY_AUTH="))
}

mod detect {
    use super::*;

    #[tokio::test]
    async fn test_creates_and_runs_phase() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle.detect(&ctx(), "", &[], &factory).await.unwrap();

        assert_eq!(factory.new_called_with_name().as_deref(), Some("detector"));
        assert_eq!(phase.run_call_count(), 1);
        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_verbose_args_and_binds() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .detect(&ctx(), "", &["test".to_string()], &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(argv(&provider)[0], "/cnb/lifecycle/detector");
        assert_sequences(
            argv(&provider),
            &[
                &["-log-level", "debug"],
                &["-app", "/workspace"],
                &["-platform", "/platform"],
            ],
        );
        assert!(has(&provider.host_config().binds, "test"));
    }

    #[tokio::test]
    async fn test_network_mode() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .detect(&ctx(), "some-network-mode", &[], &factory)
            .await
            .unwrap();

        assert_eq!(provider(&factory).host_config().network_mode, "some-network-mode");
    }
}

mod restore {
    use super::*;

    #[tokio::test]
    async fn test_creates_and_runs_phase() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle.restore(&ctx(), "some-cache", &factory).await.unwrap();

        assert_eq!(factory.new_called_with_name().as_deref(), Some("restorer"));
        assert_eq!(phase.run_call_count(), 1);
        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_daemon_access_args_and_binds() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle.restore(&ctx(), "some-cache", &factory).await.unwrap();

        let provider = provider(&factory);
        assert_eq!(provider.container_config().user, "root");
        assert!(has(&provider.host_config().binds, DOCKER_SOCKET));
        assert!(has(&provider.host_config().binds, "some-cache:/cache"));
        assert_sequences(
            argv(&provider),
            &[
                &["-log-level", "debug"],
                &["-cache-dir", "/cache"],
                &["-layers", "/layers"],
            ],
        );
    }
}

mod analyze {
    use super::*;

    #[tokio::test]
    async fn test_creates_and_runs_phase() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", false, false, &factory)
            .await
            .unwrap();

        assert_eq!(factory.new_called_with_name().as_deref(), Some("analyzer"));
        assert_eq!(phase.run_call_count(), 1);
        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_skips_layers() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", false, true, &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert!(has(argv(&provider), "-skip-layers"));
        assert!(!has(argv(&provider), "-cache-dir"));
    }

    #[tokio::test]
    async fn test_without_clear_cache_uses_cache_dir() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", false, false, &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_sequences(argv(&provider), &[&["-cache-dir", "/cache"]]);
        assert!(!has(argv(&provider), "-skip-layers"));
    }

    #[tokio::test]
    async fn test_publish_with_clear_cache_skips_layers() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", true, true, &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(
            &argv(&provider)[1..],
            &["-skip-layers", "-layers", "/layers", "some-repo-name"]
        );
        assert!(!has(argv(&provider), "-cache-dir"));
        assert!(has_registry_auth(&provider));
        assert_eq!(provider.host_config().network_mode, "host");
    }

    #[tokio::test]
    async fn test_publish_uses_registry_access() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", true, false, &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(provider.container_config().env, vec!["CNB_REGISTRY_AUTH={}"]);
        assert_eq!(provider.host_config().network_mode, "host");
        assert_eq!(provider.container_config().user, "root");
        assert_sequences(argv(&provider), &[&["-layers", "/layers"], &["some-repo-name"]]);
        assert!(!has(argv(&provider), "-daemon"));
        assert!(!has(argv(&provider), "-log-level"));
        assert_eq!(provider.host_config().binds, vec!["some-cache:/cache"]);
    }

    #[tokio::test]
    async fn test_daemon_mode() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", false, false, &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(provider.container_config().user, "root");
        assert!(has(&provider.host_config().binds, DOCKER_SOCKET));
        assert!(has(&provider.host_config().binds, "some-cache:/cache"));
        assert!(!has_registry_auth(&provider));
        assert_eq!(
            &argv(&provider)[1..],
            &[
                "-log-level",
                "debug",
                "-daemon",
                "-cache-dir",
                "/cache",
                "-layers",
                "/layers",
                "some-repo-name",
            ]
        );
    }

    #[tokio::test]
    async fn test_registry_failure_aborts_before_factory() {
        let lifecycle = lifecycle_with("0.4.1", true, Arc::new(FakeKeychain::failing()));
        let factory = FakePhaseFactory::new();

        let err = lifecycle
            .analyze(&ctx(), "some-repo-name", "some-cache", true, false, &factory)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PhaseError::CreateConfig(ConfigOpError::Auth(_))
        ));
        assert_eq!(factory.new_call_count(), 0);
    }
}

mod build {
    use super::*;

    #[tokio::test]
    async fn test_creates_and_runs_phase() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle.build(&ctx(), "", &[], &factory).await.unwrap();

        assert_eq!(factory.new_called_with_name().as_deref(), Some("builder"));
        assert_eq!(phase.run_call_count(), 1);
        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_args_network_and_binds() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .build(&ctx(), "some-network-mode", &["test".to_string()], &factory)
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_sequences(
            argv(&provider),
            &[
                &["-layers", "/layers"],
                &["-app", "/workspace"],
                &["-platform", "/platform"],
            ],
        );
        assert!(!has(argv(&provider), "-log-level"));
        assert_eq!(provider.host_config().network_mode, "some-network-mode");
        assert!(has(&provider.host_config().binds, "test"));
    }
}

mod export {
    use super::*;

    #[tokio::test]
    async fn test_creates_and_runs_phase() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle
            .export(
                &ctx(),
                "some-repo-name",
                "some-run-image",
                false,
                "some-launch-cache",
                "some-cache",
                &factory,
            )
            .await
            .unwrap();

        assert_eq!(factory.new_called_with_name().as_deref(), Some("exporter"));
        assert_eq!(phase.run_call_count(), 1);
        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_uses_registry_access() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .export(
                &ctx(),
                "some-repo-name",
                "some-run-image",
                true,
                "some-launch-cache",
                "some-cache",
                &factory,
            )
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(provider.container_config().env, vec!["CNB_REGISTRY_AUTH={}"]);
        assert_eq!(provider.host_config().network_mode, "host");
        assert_eq!(provider.container_config().user, "root");
        assert_sequences(
            argv(&provider),
            &[
                &["-log-level", "debug"],
                &["-image", "some-run-image"],
                &["-cache-dir", "/cache"],
                &["-layers", "/layers"],
                &["-app", "/workspace"],
                &["some-repo-name"],
            ],
        );
        assert!(!has(argv(&provider), "-daemon"));
        assert_eq!(provider.host_config().binds, vec!["some-cache:/cache"]);
    }

    #[tokio::test]
    async fn test_daemon_mode_mounts_launch_cache() {
        let lifecycle = verbose_lifecycle();
        let factory = FakePhaseFactory::new();

        lifecycle
            .export(
                &ctx(),
                "some-repo-name",
                "some-run-image",
                false,
                "some-launch-cache",
                "some-cache",
                &factory,
            )
            .await
            .unwrap();

        let provider = provider(&factory);
        assert_eq!(provider.container_config().user, "root");
        assert!(!has_registry_auth(&provider));
        let binds = &provider.host_config().binds;
        assert!(has(binds, DOCKER_SOCKET));
        assert!(has(binds, "some-cache:/cache"));
        assert!(has(binds, "some-launch-cache:/launch-cache"));
        assert_sequences(
            argv(&provider),
            &[
                &["-daemon"],
                &["-launch-cache", "/launch-cache"],
                &["-image", "some-run-image"],
                &["some-repo-name"],
            ],
        );
    }
}

mod log_level {
    use super::*;

    async fn detect_argv(version: &str, verbose: bool) -> Vec<String> {
        let lifecycle = lifecycle_with(version, verbose, Arc::new(AnonymousKeychain));
        let factory = FakePhaseFactory::new();
        lifecycle.detect(&ctx(), "", &[], &factory).await.unwrap();
        argv(&provider(&factory)).to_vec()
    }

    #[tokio::test]
    async fn test_absent_at_0_4_0_even_when_verbose() {
        assert!(!has(&detect_argv("0.4.0", true).await, "-log-level"));
        assert!(!has(&detect_argv("0.4.0", false).await, "-log-level"));
    }

    #[tokio::test]
    async fn test_present_above_0_4_0_only_when_verbose() {
        assert!(has_sequence(
            &detect_argv("0.4.1", true).await,
            &["-log-level", "debug"]
        ));
        assert!(!has(&detect_argv("0.4.1", false).await, "-log-level"));
    }
}

mod cleanup {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_runs_once_when_run_fails() {
        let lifecycle = verbose_lifecycle();

        for step in ["detect", "restore", "analyze", "build", "export"] {
            let phase = FakePhase::new().which_fails_run_with_exit_code(1);
            let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

            let result = match step {
                "detect" => lifecycle.detect(&ctx(), "", &[], &factory).await,
                "restore" => lifecycle.restore(&ctx(), "some-cache", &factory).await,
                "analyze" => {
                    lifecycle
                        .analyze(&ctx(), "some-repo-name", "some-cache", true, false, &factory)
                        .await
                }
                "build" => lifecycle.build(&ctx(), "", &[], &factory).await,
                _ => {
                    lifecycle
                        .export(
                            &ctx(),
                            "some-repo-name",
                            "some-run-image",
                            true,
                            "some-launch-cache",
                            "some-cache",
                            &factory,
                        )
                        .await
                }
            };

            assert!(result.is_err(), "{step} should return the run error");
            assert_eq!(phase.run_call_count(), 1, "{step}");
            assert_eq!(phase.cleanup_call_count(), 1, "{step}");
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_success() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new().which_fails_cleanup();
        let factory = FakePhaseFactory::new().which_returns_for_new(phase.clone());

        lifecycle.build(&ctx(), "", &[], &factory).await.unwrap();

        assert_eq!(phase.cleanup_call_count(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_skips_run_and_cleanup() {
        let lifecycle = verbose_lifecycle();
        let phase = FakePhase::new();
        let factory = FakePhaseFactory::new()
            .which_returns_for_new(phase.clone())
            .which_fails_with("no such image");

        let err = lifecycle.detect(&ctx(), "", &[], &factory).await.unwrap_err();

        assert!(matches!(err, PhaseError::Factory { ref phase, .. } if phase == "detector"));
        assert_eq!(phase.run_call_count(), 0);
        assert_eq!(phase.cleanup_call_count(), 0);
    }
}

#[test]
fn test_empty_update_leaves_config_unchanged() {
    let mut provider = PhaseConfigProvider::new(
        "exporter",
        vec![
            buildpack_lifecycle::build::with_args(["-daemon"]),
            buildpack_lifecycle::build::with_daemon_access(),
        ],
    )
    .unwrap();
    let before = provider.clone();

    provider.update(vec![]).unwrap();

    assert_eq!(provider.container_config(), before.container_config());
    assert_eq!(provider.host_config(), before.host_config());
}
