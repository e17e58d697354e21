use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    CaseTarget, Execution, ExecutionStatus, ExecutionType, RequestTemplate, ResolvedRequest,
    TestCase, TestResult, TestResultStatus, TypedValue, VariableScope,
};
use crate::repositories::{CaseRepository, ResultSink, VariableStore};
use crate::services::assertion::{case_status, AssertionEvaluator};
use crate::services::invoker::{HttpInvoker, RetryPolicy};
use crate::services::jsonpath;
use crate::services::resolver::{ResolveContext, ScopeSnapshot, TemplateReport, VariableResolver};

const SKIP_STOPPED: &str = "Execution was stopped before this case started";
const SKIP_AFTER_FAILURE: &str = "Skipped after an earlier case failed (stop_on_failure)";

/// Dry-run output: the request a case would send, without sending it
#[derive(Debug, Clone, Serialize)]
pub struct RequestPreview {
    pub case_id: Uuid,
    pub template: RequestTemplate,
    pub request: Option<ResolvedRequest>,
    pub report: TemplateReport,
    pub error: Option<String>,
}

/// Runs executions: resolve, invoke, assert and record every target
pub struct Orchestrator {
    variables: Arc<dyn VariableStore>,
    cases: Arc<dyn CaseRepository>,
    results: Arc<dyn ResultSink>,
    resolver: VariableResolver,
    invoker: HttpInvoker,
    evaluator: AssertionEvaluator,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        variables: Arc<dyn VariableStore>,
        cases: Arc<dyn CaseRepository>,
        results: Arc<dyn ResultSink>,
        config: EngineConfig,
    ) -> AppResult<Self> {
        Ok(Self::with_invoker(
            variables,
            cases,
            results,
            config,
            HttpInvoker::new()?,
        ))
    }

    pub fn with_invoker(
        variables: Arc<dyn VariableStore>,
        cases: Arc<dyn CaseRepository>,
        results: Arc<dyn ResultSink>,
        config: EngineConfig,
        invoker: HttpInvoker,
    ) -> Self {
        Self {
            variables,
            cases,
            results,
            resolver: VariableResolver::new(config.resolver_max_depth),
            invoker,
            evaluator: AssertionEvaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn result_sink(&self) -> Arc<dyn ResultSink> {
        Arc::clone(&self.results)
    }

    /// Run an execution to a terminal status.
    ///
    /// Case-level problems become `error` results. Only failing to record a
    /// result (or a temporary variable) aborts the run; the execution is then
    /// marked `failed` and the error returned.
    pub async fn run(
        &self,
        execution: &Execution,
        cancel: CancellationToken,
    ) -> AppResult<ExecutionStatus> {
        if let Err(e) = execution.validate() {
            tracing::warn!(execution_id = %execution.id, "Rejecting execution: {}", e);
            self.results
                .update_execution_status(
                    execution.id,
                    ExecutionStatus::Failed,
                    None,
                    Some(OffsetDateTime::now_utc()),
                )
                .await?;
            return Err(e);
        }

        self.results
            .update_execution_status(
                execution.id,
                ExecutionStatus::Running,
                Some(OffsetDateTime::now_utc()),
                None,
            )
            .await?;

        tracing::info!(
            execution_id = %execution.id,
            execution_type = execution.execution_type.as_str(),
            targets = execution.targets.len(),
            "Execution started"
        );

        let outcome = self.run_targets(execution, &cancel).await;

        if let Err(e) = self.variables.delete_all_temporary(execution.id).await {
            tracing::warn!(
                execution_id = %execution.id,
                "Failed to delete temporary variables: {}",
                e
            );
        }

        match outcome {
            Ok(results) => {
                let status = if cancel.is_cancelled() {
                    ExecutionStatus::Stopped
                } else {
                    aggregate_status(&results)
                };

                self.results
                    .update_execution_status(
                        execution.id,
                        status,
                        None,
                        Some(OffsetDateTime::now_utc()),
                    )
                    .await?;

                tracing::info!(
                    execution_id = %execution.id,
                    status = status.as_str(),
                    total = results.len(),
                    passed = results.iter().filter(|r| r.status == TestResultStatus::Pass).count(),
                    "Execution finished"
                );
                Ok(status)
            }
            Err(e) => {
                tracing::error!(execution_id = %execution.id, "Execution aborted: {}", e);
                if let Err(mark) = self
                    .results
                    .update_execution_status(
                        execution.id,
                        ExecutionStatus::Failed,
                        None,
                        Some(OffsetDateTime::now_utc()),
                    )
                    .await
                {
                    tracing::warn!(
                        execution_id = %execution.id,
                        "Failed to mark aborted execution: {}",
                        mark
                    );
                }
                Err(e)
            }
        }
    }

    /// Resolve a case's request without sending it
    pub async fn preview(
        &self,
        case_id: Uuid,
        user_id: Option<Uuid>,
        environment_id: Option<Uuid>,
        overrides: &BTreeMap<String, Value>,
    ) -> AppResult<RequestPreview> {
        let template = self.load_template(case_id, environment_id).await?;

        let mut ctx = ResolveContext::new(Uuid::new_v4())
            .with_case(case_id)
            .with_environment(environment_id);
        if let Some(user_id) = user_id {
            ctx = ctx.with_user(user_id);
        }

        let mut snapshot = self.load_snapshot(&template, &ctx).await?;
        for (name, value) in overrides {
            snapshot.insert(VariableScope::Temporary, name.clone(), TypedValue::from_json(value));
        }

        let report = self
            .resolver
            .validate(&serde_json::to_value(&template)?, &snapshot);
        let (request, error) = match self.resolver.resolve_request(&template, &snapshot) {
            Ok(request) => (Some(request), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(RequestPreview {
            case_id,
            template,
            request,
            report,
            error,
        })
    }

    async fn run_targets(
        &self,
        execution: &Execution,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<TestResult>> {
        for (name, value) in &execution.override_variables {
            self.variables
                .set_temporary(execution.id, None, name, TypedValue::from_json(value))
                .await?;
        }

        match execution.execution_type {
            ExecutionType::Single | ExecutionType::Scenario => {
                self.run_sequential(execution, cancel).await
            }
            ExecutionType::Batch => self.run_batch(execution, cancel).await,
        }
    }

    /// Steps run strictly in order; extractions land in the shared
    /// execution-level temporary scope
    async fn run_sequential(
        &self,
        execution: &Execution,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<TestResult>> {
        let mut results = Vec::with_capacity(execution.targets.len());
        let mut halted: Option<&'static str> = None;

        for (position, target) in execution.targets.iter().enumerate() {
            let position = position as i32;
            if halted.is_none() && cancel.is_cancelled() {
                halted = Some(SKIP_STOPPED);
            }

            let result = match halted {
                Some(reason) => TestResult::skipped(execution.id, target.case_id, position, reason),
                None => {
                    let result = self.run_case(execution, target, position, None).await;
                    if result.status == TestResultStatus::Pass {
                        self.apply_extractions(execution.id, None, target, &result)
                            .await?;
                    }
                    if result.status.is_failure() && execution.config.stop_on_failure {
                        halted = Some(SKIP_AFTER_FAILURE);
                    }
                    result
                }
            };

            self.record(&result).await?;
            results.push(result);
        }

        Ok(results)
    }

    /// Independent cases, at most `parallelism` in flight; each position
    /// gets its own temporary slot, so a case listed twice does not see its
    /// earlier run's extractions
    async fn run_batch(
        &self,
        execution: &Execution,
        cancel: &CancellationToken,
    ) -> AppResult<Vec<TestResult>> {
        let limit = self.parallelism(execution);
        let stop_on_failure = execution.config.stop_on_failure;
        // Cancelled by the operator token or by the first failure
        let halt = cancel.child_token();
        let halt = &halt;

        tracing::debug!(execution_id = %execution.id, parallelism = limit, "Dispatching batch");

        let mut pending = stream::iter(execution.targets.iter().enumerate())
            .map(|(position, target)| async move {
                let position = position as i32;
                if halt.is_cancelled() {
                    let reason = if cancel.is_cancelled() {
                        SKIP_STOPPED
                    } else {
                        SKIP_AFTER_FAILURE
                    };
                    return Ok::<_, AppError>(TestResult::skipped(
                        execution.id,
                        target.case_id,
                        position,
                        reason,
                    ));
                }

                let slot = Uuid::new_v4();
                let result = self.run_case(execution, target, position, Some(slot)).await;
                if result.status == TestResultStatus::Pass {
                    self.apply_extractions(execution.id, Some(slot), target, &result)
                        .await?;
                }
                if result.status.is_failure() && stop_on_failure {
                    halt.cancel();
                }
                Ok::<_, AppError>(result)
            })
            .buffer_unordered(limit);

        let mut results = Vec::with_capacity(execution.targets.len());
        while let Some(outcome) = pending.next().await {
            let result = outcome?;
            self.record(&result).await?;
            results.push(result);
        }

        results.sort_by_key(|r| r.position);
        Ok(results)
    }

    fn parallelism(&self, execution: &Execution) -> usize {
        let requested = execution
            .config
            .max_concurrency
            .unwrap_or(self.config.max_concurrent_tests);
        self.config
            .max_concurrent_tests
            .min(requested)
            .min(execution.targets.len())
            .max(1)
    }

    /// One case through resolving, invoking and asserting; never fails.
    /// `slot` selects the case-level temporary namespace, if any.
    async fn run_case(
        &self,
        execution: &Execution,
        target: &CaseTarget,
        position: i32,
        slot: Option<Uuid>,
    ) -> TestResult {
        let start = Instant::now();
        let mut result = TestResult::new(
            execution.id,
            target.case_id,
            position,
            TestResultStatus::Error,
        );

        if let Err(e) = self.execute_case(execution, target, slot, &mut result).await {
            tracing::warn!(
                execution_id = %execution.id,
                case_id = %target.case_id,
                "Case errored: {}",
                e
            );
            result.status = TestResultStatus::Error;
            result.error_message = Some(e.to_string());
        }

        result.duration_ms = start.elapsed().as_millis() as i64;
        tracing::debug!(
            execution_id = %execution.id,
            case_id = %target.case_id,
            stage = "recorded",
            status = result.status.as_str(),
            duration_ms = result.duration_ms,
            "Case finished"
        );
        result
    }

    async fn execute_case(
        &self,
        execution: &Execution,
        target: &CaseTarget,
        slot: Option<Uuid>,
        result: &mut TestResult,
    ) -> AppResult<()> {
        tracing::debug!(execution_id = %execution.id, case_id = %target.case_id, stage = "resolving", "Case stage");
        let case = self.cases.get_case(target.case_id).await?;
        let template = self
            .load_template_for(&case, execution.environment_id)
            .await?;

        let mut ctx = ResolveContext::new(execution.id)
            .with_user(execution.executor_id)
            .with_environment(execution.environment_id);
        if let Some(slot) = slot {
            ctx = ctx.with_case(slot);
        }
        let snapshot = self.load_snapshot(&template, &ctx).await?;
        let request = self.resolver.resolve_request(&template, &snapshot)?;
        result.request_data = Some(request.clone());

        tracing::debug!(execution_id = %execution.id, case_id = %target.case_id, stage = "invoking", "Case stage");
        let policy = RetryPolicy::from_config(&self.config, &execution.config);
        let response = self.invoker.invoke(&request, &policy).await?;

        tracing::debug!(execution_id = %execution.id, case_id = %target.case_id, stage = "asserting", "Case stage");
        let assertions = self.evaluator.evaluate(&response, &case.assertions);
        result.status = case_status(&assertions);
        if result.status == TestResultStatus::Error {
            result.error_message = assertions
                .iter()
                .find(|a| a.malformed)
                .map(|a| a.detail.clone());
        }
        result.assertion_results = assertions;
        result.response_data = Some(response);

        Ok(())
    }

    async fn load_template(
        &self,
        case_id: Uuid,
        environment_id: Option<Uuid>,
    ) -> AppResult<RequestTemplate> {
        let case = self.cases.get_case(case_id).await?;
        self.load_template_for(&case, environment_id).await
    }

    async fn load_template_for(
        &self,
        case: &TestCase,
        environment_id: Option<Uuid>,
    ) -> AppResult<RequestTemplate> {
        let api = self.cases.get_api_definition(case.api_id).await?;
        let environment = match environment_id {
            Some(id) => Some(self.cases.get_environment(id).await?),
            None => None,
        };
        Ok(RequestTemplate::compose(&api, case, environment.as_ref()))
    }

    async fn load_snapshot(
        &self,
        template: &RequestTemplate,
        ctx: &ResolveContext,
    ) -> AppResult<ScopeSnapshot> {
        let template = serde_json::to_value(template)?;
        ScopeSnapshot::load(self.variables.as_ref(), ctx, &[&template], &self.resolver).await
    }

    async fn apply_extractions(
        &self,
        execution_id: Uuid,
        slot: Option<Uuid>,
        target: &CaseTarget,
        result: &TestResult,
    ) -> AppResult<()> {
        let Some(response) = &result.response_data else {
            return Ok(());
        };

        for extraction in &target.extract {
            match jsonpath::select(&response.body, &extraction.json_path) {
                Ok(Some(value)) => {
                    self.variables
                        .set_temporary(
                            execution_id,
                            slot,
                            &extraction.variable,
                            TypedValue::from_json(value),
                        )
                        .await?;
                    tracing::debug!(
                        execution_id = %execution_id,
                        case_id = %target.case_id,
                        variable = %extraction.variable,
                        "Extracted temporary variable"
                    );
                }
                Ok(None) => tracing::warn!(
                    execution_id = %execution_id,
                    case_id = %target.case_id,
                    path = %extraction.json_path,
                    "Extraction path not found in response"
                ),
                Err(e) => tracing::warn!(
                    execution_id = %execution_id,
                    case_id = %target.case_id,
                    "Invalid extraction rule: {}",
                    e
                ),
            }
        }

        Ok(())
    }

    async fn record(&self, result: &TestResult) -> AppResult<()> {
        self.results.append_result(result).await.map_err(|e| {
            tracing::error!(
                execution_id = %result.execution_id,
                case_id = %result.case_id,
                "Failed to record test result: {}",
                e
            );
            e
        })
    }
}

/// Terminal status from case results, ignoring skipped cases
pub fn aggregate_status(results: &[TestResult]) -> ExecutionStatus {
    let executed = results
        .iter()
        .filter(|r| r.status != TestResultStatus::Skip)
        .count();
    let passed = results
        .iter()
        .filter(|r| r.status == TestResultStatus::Pass)
        .count();

    if executed == 0 || passed == 0 {
        ExecutionStatus::Failed
    } else if passed == executed {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Partial
    }
}
