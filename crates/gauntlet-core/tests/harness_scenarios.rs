//! End-to-end harness runs against the simulated backend

use gauntlet_artifact::{GeneratedArtifact, ToolDeclaration};
use gauntlet_core::{
    FailureKind, Harness, HarnessConfig, HarnessError, ProgressEvent, ProgressPhase, SessionState,
    TestReport, VerdictPolicy,
};
use gauntlet_sandbox::{SessionId, TestOptions};
use gauntlet_test_utils::{
    broken_import_artifact, broken_import_backend, calculator_artifact, calculator_backend,
    calculator_script, never_connects_artifact, never_connects_backend, settle,
    single_tool_artifact, two_numbers, BuildBehavior, InitBehavior, LaunchBehavior,
    ResourcesBehavior, ScriptedTool, ServerScript, SimulatedBackend, ToolBehavior,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn options() -> TestOptions {
    TestOptions::default()
        .with_readiness_timeout_secs(1)
        .with_tool_timeout_secs(1)
        .with_total_timeout_secs(30)
}

fn harness(backend: &SimulatedBackend) -> Arc<Harness> {
    Arc::new(Harness::with_backend(HarnessConfig::new(), Arc::new(backend.clone())))
}

#[derive(Default, Clone)]
struct Recorder(Arc<Mutex<Vec<ProgressEvent>>>);

impl Recorder {
    fn attach(&self, harness: &Harness, id: SessionId) {
        let sink = Arc::clone(&self.0);
        harness.register(
            id,
            Arc::new(move |e: &ProgressEvent| sink.lock().unwrap().push(e.clone())),
        );
    }

    fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }

    fn phases(&self) -> Vec<ProgressPhase> {
        self.events().iter().map(|e| e.phase).collect()
    }
}

fn leftover_workspaces(id: SessionId) -> Vec<PathBuf> {
    let prefix = format!("gauntlet-{}-", id.slug());
    std::fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect()
}

async fn run(
    harness: &Harness,
    artifact: &GeneratedArtifact,
    options: &TestOptions,
) -> (SessionId, TestReport, Recorder) {
    let id = SessionId::new();
    let recorder = Recorder::default();
    recorder.attach(harness, id);
    let report = harness.run_session(id, artifact, options).await.unwrap();
    (id, report, recorder)
}

fn assert_final_event(recorder: &Recorder, expected: ProgressPhase) {
    let phases = recorder.phases();
    assert_eq!(phases.iter().filter(|p| p.is_final()).count(), 1, "{phases:?}");
    assert_eq!(phases.last(), Some(&expected), "{phases:?}");
}

fn calculator_pair(first: ToolBehavior, second: ToolBehavior) -> (GeneratedArtifact, SimulatedBackend) {
    let artifact = GeneratedArtifact::builder("main", "{}")
        .tool(ToolDeclaration::new("first", "first tool", two_numbers("a", "b")))
        .tool(ToolDeclaration::new("second", "second tool", two_numbers("a", "b")))
        .build()
        .unwrap();
    let backend = SimulatedBackend::new(ServerScript::with_tools(vec![
        ScriptedTool::new("first", two_numbers("a", "b"), first),
        ScriptedTool::new("second", two_numbers("a", "b"), second),
    ]));
    (artifact, backend)
}

#[tokio::test]
async fn scenario_a_calculator_passes() {
    let backend = calculator_backend();
    let stats = backend.stats();
    let harness = harness(&backend);

    let (id, report, recorder) = run(&harness, &calculator_artifact(), &options()).await;

    assert!(report.build_success);
    assert_eq!(report.check("tools/list").unwrap().message, "2 tools listed");
    assert!(report.check("tools:declared").unwrap().passed);
    let names: Vec<&str> = report.tool_results.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(names, vec!["add", "multiply"]);
    assert!(report.tool_results.iter().all(|r| r.success && r.protocol_compliant));
    assert_eq!(report.tool("add").unwrap().output.as_ref().unwrap()["content"][0]["text"], "2");
    assert!(report.success);
    assert!(report.passed(VerdictPolicy::AllTools));
    assert!(report.passed(VerdictPolicy::CheckThreshold));
    assert!(report.errors.is_empty());
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.server.as_ref().unwrap().name, "simulated");
    assert_eq!(report.states.first(), Some(&SessionState::Created));
    assert_eq!(report.states.last(), Some(&SessionState::Closed));
    assert_eq!(
        backend.requests(),
        vec!["initialize", "tools/list", "tools/call", "tools/call", "resources/list"]
    );

    settle().await;
    assert_eq!(stats.live_instances(), 0);
    assert_eq!(stats.teardowns(), 1);
    assert!(leftover_workspaces(id).is_empty());
    assert_final_event(&recorder, ProgressPhase::Complete);
    assert!(!harness.events().is_registered(id));
    assert!(harness.active_sessions().is_empty());
}

#[tokio::test]
async fn scenario_b_compile_error_short_circuits() {
    let backend = broken_import_backend();
    let stats = backend.stats();
    let harness = harness(&backend);

    let (id, report, recorder) = run(&harness, &broken_import_artifact(), &options()).await;

    assert!(!report.build_success);
    assert_eq!(report.failure, Some(FailureKind::Build));
    assert_eq!(report.tools_tested(), 0);
    assert!(report.errors[0].contains("TS2307"), "{:?}", report.errors);
    assert!(!report.success);
    assert!(!report.validation().valid);
    assert_eq!(stats.launches(), 0);
    assert_eq!(stats.teardowns(), 1);
    assert!(report.states.contains(&SessionState::BuildFailed));
    assert!(!report.states.contains(&SessionState::Launching));
    assert!(leftover_workspaces(id).is_empty());
    assert_final_event(&recorder, ProgressPhase::Error);
}

#[tokio::test]
async fn scenario_c_never_ready_is_launch_failure() {
    let backend = never_connects_backend();
    let stats = backend.stats();
    let harness = harness(&backend);

    let started = Instant::now();
    let (id, report, recorder) = run(&harness, &never_connects_artifact(), &options()).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(report.build_success);
    assert_eq!(report.failure, Some(FailureKind::Launch));
    assert!(report.errors[0].contains("not ready"), "{:?}", report.errors);
    assert_eq!(report.tools_tested(), 0);
    assert!(!report.success);
    assert_eq!(report.validation().failed_critical, vec!["launch".to_string()]);

    settle().await;
    assert_eq!(stats.live_instances(), 0);
    assert!(leftover_workspaces(id).is_empty());
    assert!(recorder.phases().contains(&ProgressPhase::Cleanup));
    assert_final_event(&recorder, ProgressPhase::Error);
}

#[tokio::test]
async fn scenario_d_resources_unimplemented_is_a_pass() {
    let backend = calculator_backend();
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;

    let check = report.check("resources/list").unwrap();
    assert!(check.passed);
    assert!(check.message.contains("not implemented"), "{}", check.message);
}

#[tokio::test]
async fn resources_list_errors_fail_the_check() {
    let mut script = calculator_script();
    script.resources = ResourcesBehavior::Fail("storage offline".to_string());
    let backend = SimulatedBackend::new(script);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;
    let check = report.check("resources/list").unwrap();
    assert!(!check.passed);
    assert!(check.message.contains("storage offline"));
    assert!(report.success);
}

#[tokio::test]
async fn listed_resources_are_counted() {
    let mut script = calculator_script();
    script.resources = ResourcesBehavior::List(vec![("file:///notes".into(), "notes".into())]);
    let backend = SimulatedBackend::new(script);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;
    assert_eq!(report.check("resources/list").unwrap().message, "1 resources listed");
}

#[tokio::test]
async fn hung_tool_times_out_and_next_tool_runs() {
    let (artifact, backend) = calculator_pair(ToolBehavior::Hang, ToolBehavior::Sum);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &artifact, &options()).await;

    assert_eq!(report.tools_tested(), 2);
    let hung = report.tool("first").unwrap();
    assert!(!hung.success);
    assert!(hung.error.as_ref().unwrap().contains("timed out"));
    assert!(hung.execution_time_ms >= 900, "{}", hung.execution_time_ms);
    assert!(hung.execution_time_ms < 2_000, "{}", hung.execution_time_ms);
    assert!(report.tool("second").unwrap().success);
    assert!(!report.success);
}

#[tokio::test]
async fn credential_errors_soft_pass() {
    let (artifact, backend) = calculator_pair(
        ToolBehavior::RpcError {
            code: -32000,
            message: "Missing API key: set WEATHER_API_KEY".to_string(),
        },
        ToolBehavior::RpcError {
            code: -32000,
            message: "division by zero".to_string(),
        },
    );
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &artifact, &options()).await;

    let soft = report.tool("first").unwrap();
    assert!(soft.success);
    assert!(soft.soft_pass);
    assert!(soft.protocol_compliant);

    let hard = report.tool("second").unwrap();
    assert!(!hard.success);
    assert!(hard.protocol_compliant);
    assert_eq!(hard.error.as_deref(), Some("division by zero"));
}

#[tokio::test]
async fn is_error_and_empty_content_fail() {
    let (artifact, backend) = calculator_pair(
        ToolBehavior::IsError("upstream returned 500".to_string()),
        ToolBehavior::EmptyContent,
    );
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &artifact, &options()).await;
    assert!(report.tool_results.iter().all(|r| !r.success && r.protocol_compliant));
}

#[tokio::test]
async fn malformed_response_is_not_compliant() {
    let (artifact, backend) = calculator_pair(ToolBehavior::Malformed, ToolBehavior::Sum);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &artifact, &options()).await;

    let bad = report.tool("first").unwrap();
    assert!(!bad.success);
    assert!(!bad.protocol_compliant);
    assert!(report.tool("second").unwrap().success);
    assert!(report.warnings.iter().any(|w| w.contains("not clean")), "{:?}", report.warnings);
}

#[tokio::test]
async fn handshake_failure_still_exercises_tools() {
    let mut script = calculator_script();
    script.init = InitBehavior::Reject {
        code: -32600,
        message: "unsupported client".to_string(),
    };
    let backend = SimulatedBackend::new(script);
    let harness = harness(&backend);

    let (_, report, recorder) = run(&harness, &calculator_artifact(), &options()).await;

    assert!(!report.check("handshake").unwrap().passed);
    assert!(report.states.contains(&SessionState::HandshakeFailed));
    assert!(report.errors.iter().any(|e| e.contains("unsupported client")));
    assert_eq!(report.tools_tested(), 2);
    assert!(report.tool_results.iter().all(|r| r.success));
    assert!(report.failure.is_none());
    assert_eq!(report.validation().failed_critical, vec!["handshake".to_string()]);
    assert!(!report.passed(VerdictPolicy::CheckThreshold));
    assert_final_event(&recorder, ProgressPhase::Complete);
}

#[tokio::test]
async fn noisy_server_with_pings_still_passes() {
    let mut script = calculator_script();
    script.noisy = true;
    script.ping_after_init = true;
    let backend = SimulatedBackend::new(script);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;

    assert!(report.success);
    assert!(report.warnings.iter().any(|w| w.contains("non-protocol lines")));
}

#[tokio::test]
async fn undeclared_listing_is_reported() {
    let mut script = calculator_script();
    script.tools[1] = script.tools[1].clone().hidden();
    let backend = SimulatedBackend::new(script);
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;

    let check = report.check("tools:declared").unwrap();
    assert!(!check.passed);
    assert!(check.message.contains("multiply"));
    assert_eq!(check.details.as_ref().unwrap()["missing"], json!(["multiply"]));
    assert_eq!(report.tools_tested(), 2);
}

#[tokio::test]
async fn invalid_declared_schema_is_a_failed_check() {
    let artifact = single_tool_artifact(
        "pick",
        json!({"type": "object", "properties": {"mode": {"enum": ["a"], "const": "a"}}}),
    );
    let backend = SimulatedBackend::new(ServerScript::with_tools(vec![ScriptedTool::new(
        "pick",
        json!({"type": "object"}),
        ToolBehavior::Text("a".to_string()),
    )]));
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &artifact, &options()).await;

    let check = report.check("schema:declared:pick").unwrap();
    assert!(!check.passed);
    assert!(check.message.contains("enum") && check.message.contains("const"));
    assert!(report.check("schema:listed:pick").unwrap().passed);
}

#[tokio::test]
async fn build_panic_still_tears_down() {
    let backend = calculator_backend().with_build(BuildBehavior::Panic);
    let stats = backend.stats();
    let harness = harness(&backend);

    let (id, report, recorder) = run(&harness, &calculator_artifact(), &options()).await;

    assert_eq!(report.failure, Some(FailureKind::Internal));
    assert!(report.errors[0].contains("simulated build panic"));
    assert_eq!(stats.teardowns(), 1);
    assert!(leftover_workspaces(id).is_empty());
    assert_final_event(&recorder, ProgressPhase::Error);
}

#[tokio::test]
async fn launch_panic_still_tears_down() {
    let backend = calculator_backend().with_launch(LaunchBehavior::Panic);
    let stats = backend.stats();
    let harness = harness(&backend);

    let (id, report, _) = run(&harness, &calculator_artifact(), &options()).await;

    assert_eq!(report.failure, Some(FailureKind::Internal));
    assert!(!report.success);
    settle().await;
    assert_eq!(stats.live_instances(), 0);
    assert!(leftover_workspaces(id).is_empty());
}

#[tokio::test]
async fn crash_on_launch_carries_stderr() {
    let backend = calculator_backend()
        .with_launch(LaunchBehavior::Crash("Error: Cannot find module 'zod'".to_string()));
    let harness = harness(&backend);

    let (_, report, _) = run(&harness, &calculator_artifact(), &options()).await;
    assert_eq!(report.failure, Some(FailureKind::Launch));
    assert!(report.errors[0].contains("Cannot find module"));
}

#[tokio::test]
async fn cleanup_failure_is_only_a_warning() {
    let backend = calculator_backend().with_cleanup_failure("image is in use");
    let harness = harness(&backend);

    let (_, report, recorder) = run(&harness, &calculator_artifact(), &options()).await;

    assert!(report.success);
    assert!(report.passed(VerdictPolicy::CheckThreshold));
    assert!(report.warnings.iter().any(|w| w.contains("image is in use")));
    assert_final_event(&recorder, ProgressPhase::Complete);
}

#[tokio::test]
async fn progress_events_are_ordered() {
    let backend = calculator_backend();
    let harness = harness(&backend);

    let (id, _, recorder) = run(&harness, &calculator_artifact(), &options()).await;
    let events = recorder.events();

    assert!(events.iter().all(|e| e.session_id == id));
    assert_eq!(
        recorder.phases(),
        vec![
            ProgressPhase::Building,
            ProgressPhase::Starting,
            ProgressPhase::Testing,
            ProgressPhase::TestingTool,
            ProgressPhase::TestingTool,
            ProgressPhase::Cleanup,
            ProgressPhase::Complete,
        ]
    );
    let positions: Vec<(Option<usize>, Option<usize>)> = events
        .iter()
        .filter(|e| e.phase == ProgressPhase::TestingTool)
        .map(|e| (e.tool_index, e.total_tools))
        .collect();
    assert_eq!(positions, vec![(Some(1), Some(2)), (Some(2), Some(2))]);
}

#[tokio::test]
async fn cancel_aborts_running_session() {
    let (artifact, backend) = calculator_pair(ToolBehavior::Hang, ToolBehavior::Sum);
    let stats = backend.stats();
    let harness = harness(&backend);
    let opts = options().with_tool_timeout_secs(30);

    let id = SessionId::new();
    let recorder = Recorder::default();
    recorder.attach(&harness, id);

    let runner = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.run_session(id, &artifact, &opts).await })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while !recorder.phases().contains(&ProgressPhase::TestingTool) {
        assert!(Instant::now() < deadline, "session never reached tool testing");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let started = Instant::now();
    assert!(harness.cancel(id));

    let report = runner.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.failure, Some(FailureKind::Cancelled));
    assert!(!report.success);
    settle().await;
    assert_eq!(stats.live_instances(), 0);
    assert!(leftover_workspaces(id).is_empty());
    assert_final_event(&recorder, ProgressPhase::Error);
    assert!(!harness.cancel(id));
}

#[tokio::test]
async fn total_timeout_bounds_the_session() {
    let (artifact, backend) = calculator_pair(ToolBehavior::Hang, ToolBehavior::Hang);
    let harness = harness(&backend);
    let opts = options().with_tool_timeout_secs(30).with_total_timeout_secs(1);

    let started = Instant::now();
    let (_, report, _) = run(&harness, &artifact, &opts).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.failure, Some(FailureKind::TimedOut));
    assert!(report.errors[0].contains("total timeout"));
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let backend = calculator_backend();
    let stats = backend.stats();
    let harness = harness(&backend);
    let artifact = calculator_artifact();
    let opts = options();

    let runs = (0..4).map(|_| harness.run_session(SessionId::new(), &artifact, &opts));
    let reports = futures::future::join_all(runs).await;

    let mut ids = Vec::new();
    for report in reports {
        let report = report.unwrap();
        assert!(report.success);
        ids.push(report.session_id);
    }
    ids.sort_by_key(ToString::to_string);
    ids.dedup();
    assert_eq!(ids.len(), 4);
    settle().await;
    assert_eq!(stats.live_instances(), 0);
    assert!(harness.active_sessions().is_empty());
}

#[tokio::test]
async fn invalid_options_are_rejected_up_front() {
    let backend = calculator_backend();
    let stats = backend.stats();
    let harness = harness(&backend);
    let opts = TestOptions {
        memory_limit_mb: 0,
        ..TestOptions::default()
    };

    let err = harness
        .run_session(SessionId::new(), &calculator_artifact(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidOptions(_)));
    assert_eq!(stats.builds(), 0);
}

#[tokio::test]
async fn resources_probe_can_be_disabled() {
    let backend = calculator_backend();
    let harness = Harness::with_backend(
        HarnessConfig::new().with_resources_check(false),
        Arc::new(backend.clone()),
    );
    let opts = TestOptions {
        check_resources: false,
        ..options()
    };

    let (_, report, _) = run(&harness, &calculator_artifact(), &opts).await;
    assert!(report.check("resources/list").is_none());
    assert!(report.check("liveness").is_none());
    assert!(!backend.requests().contains(&"resources/list".to_string()));
    assert!(!report.states.contains(&SessionState::EnumeratingResources));
}
