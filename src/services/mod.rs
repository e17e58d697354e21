pub mod assertion;
pub mod execution;
pub mod functions;
pub mod invoker;
pub mod jsonpath;
pub mod orchestrator;
pub mod resolver;

pub use assertion::{case_status, AssertionEvaluator, RuleType};
pub use execution::{ExecutionReport, ExecutionService};
pub use invoker::{HttpInvoker, RetryPolicy};
pub use orchestrator::{aggregate_status, Orchestrator, RequestPreview};
pub use resolver::{ResolveContext, ScopeSnapshot, TemplateReport, VariableResolver};
