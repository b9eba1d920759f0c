//! Full harness runs against real `sh` servers on the direct-process backend

#![cfg(unix)]

use gauntlet_artifact::GeneratedArtifact;
use gauntlet_core::{FailureKind, Harness, HarnessConfig, VerdictPolicy};
use gauntlet_sandbox::{BackendKind, SessionId, TestOptions, Toolchain};
use gauntlet_test_utils::sh_calculator_artifact;
use std::time::{Duration, Instant};

fn harness(toolchain: Toolchain) -> Harness {
    Harness::new(
        HarnessConfig::new()
            .with_backend(BackendKind::Process)
            .with_toolchain(toolchain),
    )
}

fn sh_toolchain() -> Toolchain {
    Toolchain::script("src/index.ts", "sh src/index.ts")
}

fn options() -> TestOptions {
    TestOptions::default()
        .with_readiness_timeout_secs(5)
        .with_tool_timeout_secs(5)
        .with_kill_grace_secs(1)
}

#[tokio::test]
async fn sh_calculator_passes_end_to_end() {
    let harness = harness(sh_toolchain());
    assert_eq!(harness.backend_kind(), BackendKind::Process);

    let report = harness
        .run_session(SessionId::new(), &sh_calculator_artifact(), &options())
        .await
        .unwrap();

    assert!(report.build_success);
    assert_eq!(report.server.as_ref().unwrap().name, "sh-calc");
    assert_eq!(report.tools_tested(), 1);
    let add = report.tool("add").unwrap();
    assert!(add.success, "{:?}", add.error);
    assert_eq!(add.output.as_ref().unwrap()["content"][0]["text"], "2");
    assert!(report.check("resources/list").unwrap().passed);
    assert!(report.check("liveness").unwrap().passed);
    assert!(report.passed(VerdictPolicy::AllTools), "{}", report.generate_text());
    assert!(report.passed(VerdictPolicy::CheckThreshold));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[tokio::test]
async fn failing_build_step_is_reported() {
    let toolchain = sh_toolchain()
        .with_build_command("echo \"src/index.ts(1,1): error TS2307: Cannot find module 'zod'\" >&2; exit 2");
    let harness = harness(toolchain);

    let report = harness
        .run_session(SessionId::new(), &sh_calculator_artifact(), &options())
        .await
        .unwrap();

    assert_eq!(report.failure, Some(FailureKind::Build));
    assert!(report.errors[0].contains("TS2307"), "{:?}", report.errors);
    assert_eq!(report.tools_tested(), 0);
}

#[tokio::test]
async fn silent_server_fails_launch_within_bound() {
    let harness = harness(sh_toolchain());
    let artifact = GeneratedArtifact::builder("sleep 30\n", "").build().unwrap();
    let opts = options().with_readiness_timeout_secs(1);

    let started = Instant::now();
    let report = harness
        .run_session(SessionId::new(), &artifact, &opts)
        .await
        .unwrap();

    assert_eq!(report.failure, Some(FailureKind::Launch));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}
