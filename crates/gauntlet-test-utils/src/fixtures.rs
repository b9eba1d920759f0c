//! Fixture artifacts and matching server scripts

use crate::simulated::{
    BuildBehavior, LaunchBehavior, ScriptedTool, ServerScript, SimulatedBackend, ToolBehavior,
};
use gauntlet_artifact::{GeneratedArtifact, ToolDeclaration};
use serde_json::{json, Value};

const CALCULATOR_SOURCE: &str = r#"import { Server } from "@modelcontextprotocol/sdk/server/index.js";
import { StdioServerTransport } from "@modelcontextprotocol/sdk/server/stdio.js";

const server = new Server({ name: "calculator", version: "1.0.0" }, { capabilities: { tools: {} } });
await server.connect(new StdioServerTransport());
console.error("Calculator MCP server running on stdio");
"#;

const CALCULATOR_MANIFEST: &str = r#"{
  "name": "calculator",
  "version": "1.0.0",
  "type": "module",
  "scripts": { "build": "tsc" },
  "dependencies": { "@modelcontextprotocol/sdk": "^1.0.0" }
}
"#;

/// Schema with two required numeric properties
pub fn two_numbers(first: &str, second: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            first: {"type": "number", "description": "first operand"},
            second: {"type": "number", "description": "second operand"}
        },
        "required": [first, second]
    })
}

/// Two-tool calculator: `add(a, b)` and `multiply(x, y)`
pub fn calculator_artifact() -> GeneratedArtifact {
    GeneratedArtifact::builder(CALCULATOR_SOURCE, CALCULATOR_MANIFEST)
        .file("tsconfig.json", r#"{"compilerOptions":{"outDir":"dist","module":"NodeNext"}}"#)
        .tool(ToolDeclaration::new("add", "Add two numbers", two_numbers("a", "b")))
        .tool(ToolDeclaration::new(
            "multiply",
            "Multiply two numbers",
            two_numbers("x", "y"),
        ))
        .build()
        .expect("calculator fixture is valid")
}

/// Server script answering like [`calculator_artifact`]
pub fn calculator_script() -> ServerScript {
    ServerScript::with_tools(vec![
        ScriptedTool::new("add", two_numbers("a", "b"), ToolBehavior::Sum),
        ScriptedTool::new("multiply", two_numbers("x", "y"), ToolBehavior::Product),
    ])
}

/// Scenario A backend
pub fn calculator_backend() -> SimulatedBackend {
    SimulatedBackend::new(calculator_script())
}

/// Artifact importing a module that is not declared
pub fn broken_import_artifact() -> GeneratedArtifact {
    GeneratedArtifact::builder(
        "import { thing } from \"missing-lib\";\nthing();\n",
        CALCULATOR_MANIFEST,
    )
    .tool(ToolDeclaration::new("thing", "Does a thing", json!({"type": "object"})))
    .build()
    .expect("broken-import fixture is valid")
}

/// Scenario B backend: compile error
pub fn broken_import_backend() -> SimulatedBackend {
    SimulatedBackend::new(ServerScript::default()).with_build(BuildBehavior::Fail(
        "src/index.ts(1,23): error TS2307: Cannot find module 'missing-lib' or its corresponding type declarations."
            .to_string(),
    ))
}

/// Artifact whose entry point never connects its transport
pub fn never_connects_artifact() -> GeneratedArtifact {
    GeneratedArtifact::builder(
        "const server = createServer();\n// transport never connected\nsetInterval(() => {}, 1000);\n",
        CALCULATOR_MANIFEST,
    )
    .tool(ToolDeclaration::new("idle", "Never reachable", json!({"type": "object"})))
    .build()
    .expect("never-connects fixture is valid")
}

/// Scenario C backend: readiness never signalled
pub fn never_connects_backend() -> SimulatedBackend {
    SimulatedBackend::new(ServerScript::default()).with_launch(LaunchBehavior::NeverReady)
}

/// Artifact with a single tool of the given schema
pub fn single_tool_artifact(name: &str, schema: Value) -> GeneratedArtifact {
    GeneratedArtifact::builder(CALCULATOR_SOURCE, CALCULATOR_MANIFEST)
        .tool(ToolDeclaration::new(name, format!("{name} tool"), schema))
        .build()
        .expect("single-tool fixture is valid")
}

/// POSIX `sh` tool server speaking the line protocol, exposing `add(a, b)`
///
/// Request ids are pulled out with `sed`; `tools/call` always answers `2`,
/// which is what `add` returns for the generated sample arguments.
pub const SH_CALCULATOR_SERVER: &str = r#"echo "sh calculator server running on stdio" >&2
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"sh-calc","version":"0.1.0"},"capabilities":{"tools":{}}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add two numbers","inputSchema":{"type":"object","properties":{"a":{"type":"number"},"b":{"type":"number"}},"required":["a","b"]}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"2"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

/// Artifact carrying [`SH_CALCULATOR_SERVER`] as its entry point
pub fn sh_calculator_artifact() -> GeneratedArtifact {
    GeneratedArtifact::builder(SH_CALCULATOR_SERVER, "")
        .tool(ToolDeclaration::new("add", "Add two numbers", two_numbers("a", "b")))
        .build()
        .expect("sh fixture is valid")
}
