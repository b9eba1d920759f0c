//! In-memory backend
//!
//! Implements [`ExecutionBackend`] without any real process: `launch` spawns
//! a scripted tool server on a `tokio::io::duplex` pair and hands the client
//! half to the harness.

use gauntlet_artifact::GeneratedArtifact;
use gauntlet_protocol::{MCP_PROTOCOL_VERSION, METHOD_NOT_FOUND, INVALID_PARAMS};
use gauntlet_sandbox::{
    BackendKind, BuildError, CleanupError, CleanupReport, ExecutionBackend, ExecutionSession,
    InstanceHandle, LaunchError, SessionIo, TestOptions,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};

/// How a scripted tool answers `tools/call`
#[derive(Debug, Clone, PartialEq)]
pub enum ToolBehavior {
    /// Fixed text content
    Text(String),
    /// Sum of all numeric arguments
    Sum,
    /// Product of all numeric arguments
    Product,
    /// Error response
    RpcError { code: i64, message: String },
    /// Success response flagged `isError` with this text
    IsError(String),
    /// Success response with an empty content list
    EmptyContent,
    /// Never answers
    Hang,
    /// Answers with a line that carries both `result` and `error`
    Malformed,
}

/// One tool exposed by the scripted server
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub behavior: ToolBehavior,
    /// Left out of `tools/list` but still callable
    pub hidden: bool,
}

impl ScriptedTool {
    pub fn new(name: &str, input_schema: Value, behavior: ToolBehavior) -> Self {
        Self {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema,
            behavior,
            hidden: false,
        }
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// How the server answers `initialize`
#[derive(Debug, Clone, PartialEq)]
pub enum InitBehavior {
    Accept,
    Reject { code: i64, message: String },
    Malformed,
    Silent,
}

/// How the server answers `resources/list`
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcesBehavior {
    /// Method-not-found error
    Unsupported,
    /// `(uri, name)` pairs
    List(Vec<(String, String)>),
    /// Some other error
    Fail(String),
}

/// Full script for the in-memory server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerScript {
    pub server_name: String,
    pub protocol_version: String,
    pub init: InitBehavior,
    pub tools: Vec<ScriptedTool>,
    pub resources: ResourcesBehavior,
    /// Print a diagnostic line before every response
    pub noisy: bool,
    /// Send a `ping` request after the handshake
    pub ping_after_init: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            server_name: "simulated".to_string(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            init: InitBehavior::Accept,
            tools: Vec::new(),
            resources: ResourcesBehavior::Unsupported,
            noisy: false,
            ping_after_init: false,
        }
    }
}

impl ServerScript {
    pub fn with_tools(tools: Vec<ScriptedTool>) -> Self {
        Self {
            tools,
            ..Self::default()
        }
    }

    fn tool(&self, name: &str) -> Option<&ScriptedTool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// What `build` does
#[derive(Debug, Clone, PartialEq)]
pub enum BuildBehavior {
    Succeed,
    Fail(String),
    Panic,
}

/// What `launch` does
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchBehavior {
    Ready,
    /// Wait out the readiness timeout, then fail
    NeverReady,
    /// Exit immediately with this stderr
    Crash(String),
    Panic,
}

/// Counters shared with the test that owns the backend
#[derive(Debug, Default)]
pub struct SimulatorStats {
    pub builds: AtomicUsize,
    pub launches: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub live_instances: AtomicUsize,
}

impl SimulatorStats {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn live_instances(&self) -> usize {
        self.live_instances.load(Ordering::SeqCst)
    }
}

/// Backend that never touches a real process
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    script: Arc<ServerScript>,
    build: BuildBehavior,
    launch: LaunchBehavior,
    cleanup_failure: Option<String>,
    stats: Arc<SimulatorStats>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl SimulatedBackend {
    pub fn new(script: ServerScript) -> Self {
        Self {
            script: Arc::new(script),
            build: BuildBehavior::Succeed,
            launch: LaunchBehavior::Ready,
            cleanup_failure: None,
            stats: Arc::new(SimulatorStats::default()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_build(mut self, build: BuildBehavior) -> Self {
        self.build = build;
        self
    }

    #[must_use]
    pub fn with_launch(mut self, launch: LaunchBehavior) -> Self {
        self.launch = launch;
        self
    }

    /// Make teardown report one failed step
    #[must_use]
    pub fn with_cleanup_failure(mut self, message: &str) -> Self {
        self.cleanup_failure = Some(message.to_string());
        self
    }

    pub fn stats(&self) -> Arc<SimulatorStats> {
        Arc::clone(&self.stats)
    }

    /// Methods received by the server, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for SimulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Process
    }

    async fn build(
        &self,
        session: &mut ExecutionSession,
        artifact: &GeneratedArtifact,
        _options: &TestOptions,
    ) -> Result<(), BuildError> {
        self.stats.builds.fetch_add(1, Ordering::SeqCst);
        artifact.materialize(session.workspace(), &gauntlet_artifact::ArtifactLayout::default())?;
        match &self.build {
            BuildBehavior::Succeed => Ok(()),
            BuildBehavior::Fail(output) => Err(BuildError::StepFailed {
                step: "npm run build".to_string(),
                status: "exit status: 2".to_string(),
                output: output.clone(),
            }),
            BuildBehavior::Panic => panic!("simulated build panic"),
        }
    }

    async fn launch(
        &self,
        session: &mut ExecutionSession,
        options: &TestOptions,
    ) -> Result<SessionIo, LaunchError> {
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        match &self.launch {
            LaunchBehavior::Ready => {}
            LaunchBehavior::NeverReady => {
                session.set_instance(InstanceHandle::Task(tokio::spawn(std::future::pending())));
                self.stats.live_instances.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(options.readiness_timeout()).await;
                return Err(LaunchError::NotReady {
                    timeout_secs: options.readiness_timeout_secs,
                    stderr_tail: session.stderr().tail_text(8),
                });
            }
            LaunchBehavior::Crash(stderr) => {
                session.stderr().push(stderr.clone());
                return Err(LaunchError::ExitedEarly {
                    status: "exit status: 1".to_string(),
                    stderr_tail: stderr.clone(),
                });
            }
            LaunchBehavior::Panic => panic!("simulated launch panic"),
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let task = tokio::spawn(serve(
            server,
            Arc::clone(&self.script),
            Arc::clone(&self.requests),
        ));
        session.set_instance(InstanceHandle::Task(task));
        self.stats.live_instances.fetch_add(1, Ordering::SeqCst);
        Ok(SessionIo::new(client_read, client_write))
    }

    async fn teardown(&self, session: &mut ExecutionSession, options: &TestOptions) -> CleanupReport {
        self.stats.teardowns.fetch_add(1, Ordering::SeqCst);
        let mut report = CleanupReport::default();
        if let Some(instance) = session.take_instance() {
            if let InstanceHandle::Task(task) = instance {
                task.abort();
            }
            self.stats.live_instances.fetch_sub(1, Ordering::SeqCst);
            report.stopped_instance = true;
        }
        if let Some(message) = &self.cleanup_failure {
            report.record(CleanupError::ImageRemoval {
                image: "simulated".to_string(),
                message: message.clone(),
            });
        }
        session.close_workspace(options.cleanup, &mut report);
        report
    }
}

async fn serve(stream: DuplexStream, script: Arc<ServerScript>, requests: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        if msg.get("id").is_none() {
            // Notification; responses to our pings also land here.
            continue;
        }
        requests.lock().push(method.clone());
        let id = msg["id"].clone();

        if script.noisy && emit(&mut write, "debug: handling request").await.is_err() {
            return;
        }

        let reply = match method.as_str() {
            "initialize" => initialize_reply(&script, &id),
            "tools/list" => Some(result(&id, tools_list(&script))),
            "tools/call" => call_reply(&script, &id, &msg["params"]),
            "resources/list" => Some(resources_reply(&script, &id)),
            "ping" => Some(result(&id, json!({}))),
            _ => Some(error(&id, METHOD_NOT_FOUND, "Method not found")),
        };

        if let Some(reply) = reply {
            if emit(&mut write, &reply).await.is_err() {
                return;
            }
        }

        if method == "initialize" && script.ping_after_init {
            let ping = json!({"jsonrpc": "2.0", "id": "srv-ping", "method": "ping"}).to_string();
            if emit(&mut write, &ping).await.is_err() {
                return;
            }
        }
    }
}

async fn emit(write: &mut WriteHalf<DuplexStream>, line: &str) -> std::io::Result<()> {
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await
}

fn result(id: &Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

fn error(id: &Value, code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
}

fn initialize_reply(script: &ServerScript, id: &Value) -> Option<String> {
    match &script.init {
        InitBehavior::Accept => Some(result(
            id,
            json!({
                "protocolVersion": script.protocol_version,
                "serverInfo": {"name": script.server_name, "version": "1.0.0"},
                "capabilities": {"tools": {}}
            }),
        )),
        InitBehavior::Reject { code, message } => Some(error(id, *code, message)),
        InitBehavior::Malformed => Some(result(id, json!({"unexpected": true}))),
        InitBehavior::Silent => None,
    }
}

fn tools_list(script: &ServerScript) -> Value {
    let tools: Vec<Value> = script
        .tools
        .iter()
        .filter(|t| !t.hidden)
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": t.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn call_reply(script: &ServerScript, id: &Value, params: &Value) -> Option<String> {
    let name = params["name"].as_str().unwrap_or_default();
    let Some(tool) = script.tool(name) else {
        return Some(error(id, INVALID_PARAMS, &format!("Unknown tool: {name}")));
    };
    let args = &params["arguments"];

    let text_result = |text: String| result(id, json!({"content": [{"type": "text", "text": text}]}));

    Some(match &tool.behavior {
        ToolBehavior::Text(text) => text_result(text.clone()),
        ToolBehavior::Sum => text_result(fold_numbers(args, 0.0, |a, b| a + b).to_string()),
        ToolBehavior::Product => text_result(fold_numbers(args, 1.0, |a, b| a * b).to_string()),
        ToolBehavior::RpcError { code, message } => error(id, *code, message),
        ToolBehavior::IsError(text) => result(
            id,
            json!({"content": [{"type": "text", "text": text}], "isError": true}),
        ),
        ToolBehavior::EmptyContent => result(id, json!({"content": []})),
        ToolBehavior::Hang => return None,
        ToolBehavior::Malformed => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"content": []},
            "error": {"code": -1, "message": "both"}
        })
        .to_string(),
    })
}

fn fold_numbers(args: &Value, init: f64, op: impl Fn(f64, f64) -> f64) -> f64 {
    args.as_object()
        .map(|map| map.values().filter_map(Value::as_f64).fold(init, op))
        .unwrap_or(init)
}

fn resources_reply(script: &ServerScript, id: &Value) -> String {
    match &script.resources {
        ResourcesBehavior::Unsupported => error(id, METHOD_NOT_FOUND, "Method not found"),
        ResourcesBehavior::List(items) => {
            let resources: Vec<Value> = items
                .iter()
                .map(|(uri, name)| json!({"uri": uri, "name": name}))
                .collect();
            result(id, json!({ "resources": resources }))
        }
        ResourcesBehavior::Fail(message) => error(id, -32000, message),
    }
}

/// Give spawned server tasks a moment to observe aborts
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
