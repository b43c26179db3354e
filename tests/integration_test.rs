use async_trait::async_trait;
use dtsflow::config::EngineConfig;
use dtsflow::tool::expression::ResolveExpressionTool;
use dtsflow::tool::filesystem::ListFilesTool;
use dtsflow::tool::{Tool, ToolRegistry, ToolResult};
use dtsflow::workflow::materialize::materialize_workflow;
use dtsflow::workflow::parser::load_workflow;
use dtsflow::workflow::{RunState, StepState, WorkflowEngine};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Stand-in for a package analyzer: reports the file it was given.
struct FakeAnalyzer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for FakeAnalyzer {
    fn name(&self) -> &str {
        "analyze_package"
    }
    fn description(&self) -> &str {
        "Fake analyzer"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, args: HashMap<String, Value>) -> ToolResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match args.get("file_path").and_then(|v| v.as_str()) {
            Some(path) => ToolResult::success(json!({"file": path, "tasks": 2}).to_string()),
            None => ToolResult::error("file_path is required"),
        }
    }
}

async fn registry(calls: Arc<AtomicUsize>) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry
        .register(Arc::new(ListFilesTool::new(String::new(), false)))
        .await;
    registry.register(Arc::new(FakeAnalyzer { calls })).await;
    registry
        .register(Arc::new(ResolveExpressionTool::new(10)))
        .await;
    registry
}

const WORKFLOW: &str = r#"
Name: package-report
Steps:
  - Name: discover
    Type: list_files
    Parameters:
      directory: packages
      extension: dtsx
    Output:
      Name: Files
      Format: json
  - Name: analyze
    Type: analyze_package
    Parameters:
      file_path: "{pkg}"
    loop:
      input_data: "{discover.Files}"
      item_name: pkg
    Output:
      Name: Findings
      Format: json
    output_file_path: reports/findings.json
  - Name: connection
    Type: resolve_expression
    Parameters:
      expression: "Server=@[User::Server];Db=@[$Project::Db]"
      variables:
        Server: db01
        Db: staging
    output_file_path: reports/connection.txt
  - Name: archive
    Type: analyze_package
    Enabled: false
    Parameters:
      file_path: nowhere.dtsx
"#;

#[tokio::test]
async fn test_workflow_end_to_end() {
    dtsflow::logger::init_test();

    let tmp = tempfile::tempdir().unwrap();
    let pkgs = tmp.path().join("packages");
    std::fs::create_dir_all(&pkgs).unwrap();
    std::fs::write(pkgs.join("LoadSales.dtsx"), "<DTS:Executable/>").unwrap();
    std::fs::write(pkgs.join("Stage.dtsx"), "<DTS:Executable/>").unwrap();
    std::fs::write(pkgs.join("readme.md"), "ignored").unwrap();

    let doc_path = tmp.path().join("report.yaml");
    std::fs::write(&doc_path, WORKFLOW).unwrap();

    let workflow = load_workflow(&doc_path, &EngineConfig::default()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = WorkflowEngine::new(
        Arc::new(registry(calls.clone()).await),
        EngineConfig::default(),
    );

    let mut state = RunState::default();
    engine.execute(&workflow, &mut state).await.unwrap();

    // Two packages analyzed; the disabled step never ran.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(state.state_of("archive"), Some(StepState::Skipped));
    assert!(!state.results.contains_key("archive"));

    let report = materialize_workflow(&workflow, &state.results).await;
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.written.len(), 2);

    let findings: Value = serde_json::from_str(
        &std::fs::read_to_string(tmp.path().join("reports/findings.json")).unwrap(),
    )
    .unwrap();
    let data = findings["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["package"], json!("LoadSales"));
    assert_eq!(data[1]["package"], json!("Stage"));
    assert_eq!(data[1]["tasks"], json!(2));

    let connection = std::fs::read_to_string(tmp.path().join("reports/connection.txt")).unwrap();
    assert_eq!(connection, "Server=db01;Db=staging\n");
}

#[tokio::test]
async fn test_failed_step_keeps_earlier_results() {
    let tmp = tempfile::tempdir().unwrap();
    let doc_path = tmp.path().join("broken.json");
    std::fs::write(
        &doc_path,
        r#"{
            "Steps": [
                {"Name": "vars", "Type": "resolve_expression",
                 "Parameters": {"expression": "@[User::X]", "variables": {"X": "1"}}},
                {"Name": "analyze", "Type": "analyze_package", "Parameters": {}},
                {"Name": "never", "Type": "resolve_expression",
                 "Parameters": {"expression": "{vars.Result}"}}
            ]
        }"#,
    )
    .unwrap();

    let workflow = load_workflow(&doc_path, &EngineConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = WorkflowEngine::new(
        Arc::new(registry(calls.clone()).await),
        EngineConfig::default(),
    );

    let mut state = RunState::default();
    let err = engine.execute(&workflow, &mut state).await.unwrap_err();

    assert_eq!(err.step(), Some("analyze"));
    assert!(err.to_string().contains("file_path is required"));
    assert_eq!(state.results["vars"]["Result"].value, "1");
    assert_eq!(state.state_of("analyze"), Some(StepState::Failed));
    assert_eq!(state.state_of("never"), None);
}

#[tokio::test]
async fn test_unknown_operation_is_invocation_error() {
    let tmp = tempfile::tempdir().unwrap();
    let doc_path = tmp.path().join("wf.yml");
    std::fs::write(&doc_path, "Steps:\n  - { Name: a, Type: does_not_exist }\n").unwrap();

    let workflow = load_workflow(&doc_path, &EngineConfig::default()).unwrap();
    let engine = WorkflowEngine::new(
        Arc::new(registry(Arc::new(AtomicUsize::new(0))).await),
        EngineConfig::default(),
    );

    let err = engine.run(&workflow).await.unwrap_err();
    assert!(err.to_string().contains("tool 'does_not_exist' not found"));
}
