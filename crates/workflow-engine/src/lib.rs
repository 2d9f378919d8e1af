//! Workflow Engine - declarative agent workflows as typed step graphs
//!
//! This crate holds the in-memory workflow model and everything needed to run
//! it:
//!
//! - Steps, edge groups and variables with structural queries and edits
//! - Advisory structural validation (start step, dangling edges, cycles)
//! - Template substitution and lightweight condition evaluation
//! - A single-threaded interpreter with report and streaming modes
//! - Prepared-workflow cache and a JSON-backed workflow store
//!
//! # Example
//!
//! ```ignore
//! use workflow_engine::{StepKind, WorkflowBuilder, WorkflowEngine, NullEventSink};
//!
//! let workflow = WorkflowBuilder::new("greeter", "Greeter")
//!     .add_step("greet", StepKind::SendMessage)
//!     .with_config_value("message", "Hello ${input}")
//!     .add_step("done", StepKind::EndWorkflow)
//!     .connect("greet", "done")
//!     .build();
//!
//! let report = WorkflowEngine::new(agent)
//!     .execute_definition(&workflow, "Ada", &NullEventSink)
//!     .await?;
//! ```

pub mod builder;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod handlers;
pub mod resolver;
pub mod store;
pub mod types;
pub mod validation;

// Re-export key types
pub use builder::WorkflowBuilder;
pub use cache::{PreparedWorkflow, RunnableCache};
pub use config::{ConfigError, EngineConfig, FailurePolicy};
pub use context::VariableContext;
pub use error::{EngineError, Result};
pub use events::{sse, EventSink, EventType, NullEventSink, VecEventSink, WorkflowEvent};
pub use executor::{
    CancellationHandle, ExecutionReport, RunStatus, StepRecord, StepStatus, WorkflowEngine,
};
pub use handlers::{AgentInvoker, StepContext, StepHandler, StepOutcome, StepRegistry};
pub use resolver::{evaluate_condition, resolve};
pub use store::{WorkflowMetadata, WorkflowStore};
pub use types::{
    Edge, EdgeGroup, EdgeGroupType, Step, StepConfig, StepKind, Variable, VariableScope,
    VariableType, WorkflowDefinition, DEFAULT_MAX_ITERATIONS,
};
pub use validation::{validate, ValidationError, ValidationReport, ValidationWarning};
