// dtsflow — Sequential workflow engine
//
// Steps run strictly in declaration order and loop iterations strictly in
// item order. Later steps read earlier results, so nothing here runs
// concurrently and the results map needs no locking.

use super::error::WorkflowError;
use super::expander::{self, LoopIteration};
use super::resolver::resolve_parameters;
use super::{parser, ExecutionResults, Parameters, Step, StepResult, StepState, Workflow};
use crate::config::EngineConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use crate::tool::OperationRegistry;

/// Everything a run has produced so far. On failure it holds the results of
/// the steps that completed before the failing one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    pub results: ExecutionResults,
    /// Visited steps in execution order with their latest state.
    pub states: Vec<(String, StepState)>,
}

impl RunState {
    pub fn state_of(&self, step: &str) -> Option<StepState> {
        self.states
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, state)| *state)
    }

    fn transition(&mut self, step: &str, state: StepState) {
        tracing::debug!(step = %step, state = %state, "Step state");
        match self.states.iter_mut().find(|(name, _)| name == step) {
            Some(entry) => entry.1 = state,
            None => self.states.push((step.to_string(), state)),
        }
    }
}

pub struct WorkflowEngine {
    registry: Arc<dyn OperationRegistry>,
    settings: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<dyn OperationRegistry>, settings: EngineConfig) -> Self {
        Self { registry, settings }
    }

    /// Run `workflow` to completion and return its results.
    pub async fn run(&self, workflow: &Workflow) -> Result<ExecutionResults, WorkflowError> {
        let mut state = RunState::default();
        self.execute(workflow, &mut state).await?;
        Ok(state.results)
    }

    /// Run `workflow`, accumulating into `state`. The first failing step ends
    /// the run; `state` keeps whatever completed before it.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        state: &mut RunState,
    ) -> Result<(), WorkflowError> {
        parser::validate(workflow)?;

        let started = std::time::Instant::now();
        tracing::info!(
            workflow = workflow.name.as_deref().unwrap_or("<unnamed>"),
            steps = workflow.steps.len(),
            "Workflow starting"
        );

        for step in &workflow.steps {
            state.transition(&step.name, StepState::Pending);

            if !step.enabled {
                tracing::info!(step = %step.name, "Step disabled, skipping");
                state.transition(&step.name, StepState::Skipped);
                continue;
            }

            match self.execute_step(step, state).await {
                Ok((output_name, result)) => {
                    tracing::info!(
                        step = %step.name,
                        output = %output_name,
                        bytes = result.value.len(),
                        "Step captured"
                    );
                    state
                        .results
                        .entry(step.name.clone())
                        .or_default()
                        .insert(output_name, result);
                    state.transition(&step.name, StepState::Captured);
                }
                Err(e) => {
                    tracing::error!(step = %step.name, error = %e, "Step failed");
                    state.transition(&step.name, StepState::Failed);
                    return Err(e);
                }
            }
        }

        tracing::info!(
            duration_ms = %started.elapsed().as_millis(),
            "Workflow completed"
        );
        Ok(())
    }

    /// Resolve, invoke and capture one enabled step against the results of
    /// the steps before it.
    pub async fn execute_step(
        &self,
        step: &Step,
        state: &mut RunState,
    ) -> Result<(String, StepResult), WorkflowError> {
        state.transition(&step.name, StepState::Resolving);

        let value = match &step.loop_spec {
            Some(spec) => {
                let iterations = expander::expand(spec, &step.parameters, &state.results)
                    .map_err(|e| WorkflowError::resolution(&step.name, e))?;
                state.transition(&step.name, StepState::Invoking);
                self.invoke_loop(step, iterations).await?
            }
            None => {
                let parameters = resolve_parameters(&step.parameters, &state.results)
                    .map_err(|e| WorkflowError::resolution(&step.name, e))?;
                state.transition(&step.name, StepState::Invoking);
                self.invoke(step, parameters, None).await?
            }
        };

        let result = StepResult {
            value,
            format: self.output_format(step),
        };
        Ok((self.output_name(step), result))
    }

    async fn invoke_loop(
        &self,
        step: &Step,
        iterations: Vec<LoopIteration>,
    ) -> Result<String, WorkflowError> {
        let total = iterations.len();
        let mut outputs = Vec::with_capacity(total);
        for (index, iteration) in iterations.into_iter().enumerate() {
            tracing::info!(
                step = %step.name,
                iteration = index,
                total,
                item = %iteration.item,
                "Loop iteration"
            );
            outputs.push(self.invoke(step, iteration.parameters, Some(index)).await?);
        }
        Ok(outputs.join("\n"))
    }

    async fn invoke(
        &self,
        step: &Step,
        parameters: Parameters,
        iteration: Option<usize>,
    ) -> Result<String, WorkflowError> {
        let args: HashMap<String, Value> = parameters
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();

        tracing::debug!(step = %step.name, tool = %step.step_type, "Invoking operation");
        self.registry
            .invoke(&step.step_type, args)
            .await
            .map_err(|e| WorkflowError::Invocation {
                step: step.name.clone(),
                iteration,
                message: e.to_string(),
            })
    }

    /// Declared output name, or the configured default.
    pub fn output_name(&self, step: &Step) -> String {
        step.output
            .as_ref()
            .map(|o| o.name.trim())
            .filter(|n| !n.is_empty())
            .unwrap_or(self.settings.default_output_name.as_str())
            .to_string()
    }

    /// Declared output format, or the configured default.
    pub fn output_format(&self, step: &Step) -> String {
        step.output
            .as_ref()
            .map(|o| o.format.trim())
            .filter(|f| !f.is_empty())
            .unwrap_or(self.settings.default_output_format.as_str())
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolError;
    use crate::workflow::parser::{parse_workflow, DocumentFormat};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Records every call; `fail_on` makes matching calls error.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, HashMap<String, Value>)>>,
        fail_on: Option<(String, String)>,
    }

    #[async_trait]
    impl OperationRegistry for Recorder {
        async fn invoke(
            &self,
            name: &str,
            args: HashMap<String, Value>,
        ) -> Result<String, ToolError> {
            self.calls.lock().await.push((name.to_string(), args.clone()));
            if let Some((tool, needle)) = &self.fail_on {
                let hit = args.values().any(|v| v.as_str() == Some(needle.as_str()));
                if tool == name && hit {
                    return Err(ToolError::Failed {
                        tool: name.to_string(),
                        message: "boom".to_string(),
                    });
                }
            }
            match name {
                "list" => Ok(r#"["x.dtsx","y.dtsx"]"#.to_string()),
                _ => Ok(format!(
                    "{}:{}",
                    name,
                    args.get("file").and_then(|v| v.as_str()).unwrap_or("-")
                )),
            }
        }
    }

    fn engine(recorder: Arc<Recorder>) -> WorkflowEngine {
        WorkflowEngine::new(recorder, EngineConfig::default())
    }

    fn workflow(doc: &str) -> Workflow {
        parse_workflow(doc, DocumentFormat::Yaml).unwrap()
    }

    #[tokio::test]
    async fn test_steps_run_in_declaration_order() {
        crate::logger::init_test();
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: one, Type: first }
  - { Name: two, Type: second, Enabled: false }
  - { Name: three, Type: third }
"#,
        );

        let mut state = RunState::default();
        engine(recorder.clone()).execute(&wf, &mut state).await.unwrap();

        let calls = recorder.calls.lock().await;
        let names: Vec<&str> = calls.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
        assert_eq!(state.state_of("two"), Some(StepState::Skipped));
        assert_eq!(state.state_of("three"), Some(StepState::Captured));
        assert!(!state.results.contains_key("two"));
        assert_eq!(state.results["one"]["Result"].value, "first:-");
        assert_eq!(state.results["one"]["Result"].format, "text");
    }

    #[tokio::test]
    async fn test_forward_reference_fails_before_invoking() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: B, Type: use, Parameters: { file: "{A.Result}" } }
  - { Name: A, Type: make }
"#,
        );

        let err = engine(recorder.clone()).run(&wf).await.unwrap_err();
        assert!(err.to_string().contains("has not produced outputs"));
        assert_eq!(err.step(), Some("B"));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_backward_reference_resolves() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: A, Type: make }
  - { Name: B, Type: use, Parameters: { file: "{A.Result}" } }
"#,
        );

        let results = engine(recorder.clone()).run(&wf).await.unwrap();
        assert_eq!(results["B"]["Result"].value, "use:make:-");
    }

    #[tokio::test]
    async fn test_loop_invokes_once_per_item_in_order() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - Name: scan
    Type: analyze
    Parameters: { file: "{file}" }
    loop: { input_data: '["x.dtsx","y.dtsx"]', item_name: file }
    Output: { Name: Findings, Format: json }
"#,
        );

        let results = engine(recorder.clone()).run(&wf).await.unwrap();

        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["file"], Value::from("x.dtsx"));
        assert_eq!(calls[1].1["file"], Value::from("y.dtsx"));
        let captured = &results["scan"]["Findings"];
        assert_eq!(captured.value, "analyze:x.dtsx\nanalyze:y.dtsx");
        assert_eq!(captured.format, "json");
    }

    #[tokio::test]
    async fn test_loop_over_previous_step_output() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: discover, Type: list, Output: { Name: Files, Format: json } }
  - Name: scan
    Type: analyze
    Parameters: { file: "{pkg}" }
    loop: { input_data: "{discover.Files}", item_name: pkg }
"#,
        );

        let results = engine(recorder).run(&wf).await.unwrap();
        assert_eq!(
            results["scan"]["Result"].value,
            "analyze:x.dtsx\nanalyze:y.dtsx"
        );
    }

    #[tokio::test]
    async fn test_invocation_failure_stops_run_with_iteration() {
        let recorder = Arc::new(Recorder {
            fail_on: Some(("analyze".into(), "b".into())),
            ..Default::default()
        });
        let wf = workflow(
            r#"
Steps:
  - { Name: first, Type: make }
  - Name: scan
    Type: analyze
    Parameters: { file: "{f}" }
    loop: { input_data: "a,b,c", item_name: f }
  - { Name: last, Type: make }
"#,
        );

        let mut state = RunState::default();
        let err = engine(recorder.clone())
            .execute(&wf, &mut state)
            .await
            .unwrap_err();

        match err {
            WorkflowError::Invocation {
                step, iteration, ..
            } => {
                assert_eq!(step, "scan");
                assert_eq!(iteration, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        // a, b attempted; c and `last` never run
        assert_eq!(recorder.calls.lock().await.len(), 3);
        assert!(state.results.contains_key("first"));
        assert!(!state.results.contains_key("scan"));
        assert_eq!(state.state_of("scan"), Some(StepState::Failed));
        assert_eq!(state.state_of("last"), None);
    }

    #[tokio::test]
    async fn test_empty_loop_input_is_resolution_error() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - Name: scan
    Type: analyze
    loop: { input_data: "[]", item_name: f }
"#,
        );
        let err = engine(recorder.clone()).run(&wf).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Resolution { .. }));
        assert!(err.to_string().contains("did not yield any items"));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_step_name_with_space_rejected_before_any_call() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: "Load Sales", Type: make }
  - { Name: B, Type: use, Parameters: { x: "{Load Sales.Result}" } }
"#,
        );
        let err = engine(recorder.clone()).run(&wf).await.unwrap_err();
        assert!(matches!(&err, WorkflowError::InvalidStepName(n) if n == "Load Sales"));
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_workflow_rejected_before_any_call() {
        let recorder = Arc::new(Recorder::default());
        let wf = workflow(
            r#"
Steps:
  - { Name: a, Type: make }
  - { Name: a, Type: make }
"#,
        );
        let err = engine(recorder.clone()).run(&wf).await.unwrap_err();
        assert!(err.is_definition_error());
        assert!(recorder.calls.lock().await.is_empty());
    }

    #[test]
    fn test_output_defaults() {
        let engine = engine(Arc::new(Recorder::default()));
        let wf = workflow(
            r#"
Steps:
  - { Name: a, Type: t }
  - { Name: b, Type: t, Output: { Name: Out, Format: "" } }
"#,
        );
        assert_eq!(engine.output_name(&wf.steps[0]), "Result");
        assert_eq!(engine.output_format(&wf.steps[0]), "text");
        assert_eq!(engine.output_name(&wf.steps[1]), "Out");
        assert_eq!(engine.output_format(&wf.steps[1]), "text");
    }
}
