//! Callable registry
//!
//! The typed function registry: register functions with declared
//! signatures, invoke them by name with kwargs, and get back registered,
//! provenance-stamped output records.
//!
//! ## Execution procedure
//!
//! 1. resolve metadata (UnknownFunction otherwise);
//! 2. classify the kwargs and prepare isolated inputs (strategy module);
//! 3. invoke the body (sync inline, async awaited);
//! 4. unpack and register the outputs (semantic module);
//! 5. register the FunctionExecution record and return the outcome.
//!
//! The whole procedure runs under the emit decorator: a paired
//! `function.executing` / `function.executed` (or `function.failed`)
//! event wraps it, and the store's notification events land as children,
//! so nested `execute` calls form event trees without manual threading.
//! Within one call the steps are strictly sequential; across calls there
//! is no shared mutable state because every input is an isolated copy.

use crate::execution;
use crate::kwargs::Kwargs;
use crate::semantic::{process_outputs, unpack, SemanticResult};
use crate::signature::{
    analyse, FunctionSignature, ParamSpec, ReturnPattern, ReturnSpec, SignatureArtifacts,
};
use crate::strategy::{prepare, ExecutionInput, ExecutionStrategy, PreparedInputs};
use chrono::Utc;
use dashmap::DashMap;
use provenant_core::{
    Entity, Error, EventPhase, ExecutionId, FunctionError, Result, Value, ValueKind, VersionId,
};
use provenant_events::{decorate_async_with, decorate_sync_with, Event, EventBus, OperationSpec};
use provenant_store::EntityStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Event type of a function invocation's start event
pub const FUNCTION_EXECUTING: &str = "function.executing";
/// Event type of a function invocation's completion event
pub const FUNCTION_EXECUTED: &str = "function.executed";
/// Event type of a function invocation's failure event
pub const FUNCTION_FAILED: &str = "function.failed";

/// Result type registered function bodies return
pub type FnResult = std::result::Result<Value, FunctionError>;

/// A synchronous function body
pub type SyncBody = Arc<dyn Fn(ExecutionInput) -> FnResult + Send + Sync>;

/// The boxed future an async body produces
pub type BoxedFnFuture = Pin<Box<dyn Future<Output = FnResult> + Send>>;

/// An asynchronous function body
pub type AsyncBody = Arc<dyn Fn(ExecutionInput) -> BoxedFnFuture + Send + Sync>;

/// A registered function's body
#[derive(Clone)]
pub enum FunctionBody {
    /// Invoked inline
    Sync(SyncBody),
    /// Awaited on the caller's task
    Async(AsyncBody),
}

impl FunctionBody {
    /// Check whether this body must be awaited
    pub fn is_async(&self) -> bool {
        matches!(self, FunctionBody::Async(_))
    }
}

/// A complete function registration
pub struct FunctionSpec {
    name: String,
    description: Option<String>,
    signature: FunctionSignature,
    force_unpack: bool,
    body: FunctionBody,
}

impl FunctionSpec {
    /// Start declaring a function
    pub fn builder(name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder {
            name: name.into(),
            description: None,
            params: Vec::new(),
            returns: None,
            force_unpack: false,
        }
    }
}

/// Builder for [`FunctionSpec`]
pub struct FunctionBuilder {
    name: String,
    description: Option<String>,
    params: Vec<ParamSpec>,
    returns: Option<ReturnSpec>,
    force_unpack: bool,
}

impl FunctionBuilder {
    /// Declare an entity parameter
    pub fn entity_param(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.params.push(ParamSpec::entity(name, type_name));
        self
    }

    /// Declare a primitive parameter
    pub fn primitive_param(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.params.push(ParamSpec::primitive(name, kind));
        self
    }

    /// Declare a configuration parameter
    pub fn config_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec::config(name));
        self
    }

    /// Declare the return shape
    pub fn returns(mut self, returns: ReturnSpec) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Split container returns into siblings instead of wrapping
    pub fn force_unpack(mut self) -> Self {
        self.force_unpack = true;
        self
    }

    /// Attach a human-readable description
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Finish with a synchronous body
    pub fn sync(self, body: impl Fn(ExecutionInput) -> FnResult + Send + Sync + 'static) -> FunctionSpec {
        self.finish(FunctionBody::Sync(Arc::new(body)))
    }

    /// Finish with an asynchronous body
    pub fn asynchronous<F, Fut>(self, body: F) -> FunctionSpec
    where
        F: Fn(ExecutionInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FnResult> + Send + 'static,
    {
        self.finish(FunctionBody::Async(Arc::new(move |input| {
            Box::pin(body(input))
        })))
    }

    fn finish(self, body: FunctionBody) -> FunctionSpec {
        FunctionSpec {
            name: self.name,
            description: self.description,
            signature: FunctionSignature {
                params: self.params,
                // An undeclared return defaults to an any-typed primitive.
                returns: self.returns.unwrap_or(ReturnSpec {
                    pattern: ReturnPattern::Primitive,
                    entity_type: None,
                    primitive_kind: None,
                }),
            },
            force_unpack: self.force_unpack,
            body,
        }
    }
}

/// Cached registration metadata of one function
#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    /// Function name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Declared parameters and return
    pub signature: FunctionSignature,
    /// Synthesised schemas and unpacking flag
    pub artifacts: SignatureArtifacts,
    /// Declared return shape
    pub return_pattern: ReturnPattern,
    /// Whether registration opted into container unpacking
    pub force_unpack: bool,
    /// Whether the body must be awaited
    pub is_async: bool,
}

struct RegisteredFunction {
    metadata: FunctionMetadata,
    body: FunctionBody,
}

/// The result of one invocation
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Registered output records, in output order
    pub records: Vec<Entity>,
    /// Per-record semantic classification, parallel to `records`
    pub semantics: Vec<SemanticResult>,
    /// Identity of this invocation
    pub execution_id: ExecutionId,
    /// Version of the registered FunctionExecution record
    pub execution_version_id: VersionId,
    /// The strategy inputs were prepared with
    pub strategy: ExecutionStrategy,
}

impl ExecutionOutcome {
    /// Number of output records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check for the no-output case
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume the outcome, expecting exactly one record
    pub fn into_single(mut self) -> Result<Entity> {
        if self.records.len() != 1 {
            return Err(Error::InvariantViolation(format!(
                "expected a single output record, got {}",
                self.records.len()
            )));
        }
        Ok(self.records.remove(0))
    }
}

/// Typed function registry executing over a store and an event bus
pub struct CallableRegistry {
    functions: DashMap<String, Arc<RegisteredFunction>>,
    store: Arc<EntityStore>,
    bus: Arc<EventBus>,
}

impl CallableRegistry {
    /// Create a registry over a store and bus
    pub fn new(store: Arc<EntityStore>, bus: Arc<EventBus>) -> Self {
        CallableRegistry {
            functions: DashMap::new(),
            store,
            bus,
        }
    }

    /// The store this registry registers records into
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// The bus this registry emits through
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a function
    ///
    /// Runs the signature analyser and caches its artifacts. Fails with
    /// [`Error::DuplicateName`] when the name is taken.
    pub fn register(&self, spec: FunctionSpec) -> Result<()> {
        let artifacts = analyse(&spec.name, &spec.signature, spec.force_unpack)?;
        let metadata = FunctionMetadata {
            name: spec.name.clone(),
            description: spec.description,
            return_pattern: spec.signature.returns.pattern,
            signature: spec.signature,
            artifacts,
            force_unpack: spec.force_unpack,
            is_async: spec.body.is_async(),
        };
        match self.functions.entry(spec.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::DuplicateName(spec.name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(function = %metadata.name, asynchronous = metadata.is_async, "registered function");
                slot.insert(Arc::new(RegisteredFunction {
                    metadata,
                    body: spec.body,
                }));
                Ok(())
            }
        }
    }

    /// Registered function names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// A function's cached registration metadata
    pub fn metadata(&self, name: &str) -> Result<FunctionMetadata> {
        self.functions
            .get(name)
            .map(|f| f.metadata.clone())
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute a registered function synchronously
    ///
    /// Fails with [`Error::AsyncOnly`] for async-bodied functions.
    pub fn execute(&self, name: &str, kwargs: Kwargs) -> Result<ExecutionOutcome> {
        let func = self.lookup(name)?;
        if func.body.is_async() {
            return Err(Error::AsyncOnly(name.to_string()));
        }
        let spec = self.operation_spec(name);
        decorate_sync_with(
            &self.bus,
            spec,
            || self.run_pipeline_sync(&func, kwargs),
            finish_event,
        )
    }

    /// Execute a registered function, awaiting async bodies
    pub async fn execute_async(&self, name: &str, kwargs: Kwargs) -> Result<ExecutionOutcome> {
        let func = self.lookup(name)?;
        let spec = self.operation_spec(name);
        decorate_async_with(
            &self.bus,
            spec,
            async {
                match func.body.clone() {
                    FunctionBody::Sync(_) => self.run_pipeline_sync(&func, kwargs),
                    FunctionBody::Async(body) => {
                        self.run_pipeline_async(&func, body, kwargs).await
                    }
                }
            },
            finish_event,
        )
        .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lookup(&self, name: &str) -> Result<Arc<RegisteredFunction>> {
        self.functions
            .get(name)
            .map(|f| f.clone())
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))
    }

    fn operation_spec(&self, name: &str) -> OperationSpec {
        OperationSpec::new(
            Event::new(FUNCTION_EXECUTING, EventPhase::Started)
                .with_metadata("function", name),
        )
        .completed_as(FUNCTION_EXECUTED)
        .failed_as(FUNCTION_FAILED)
    }

    fn run_pipeline_sync(
        &self,
        func: &RegisteredFunction,
        kwargs: Kwargs,
    ) -> Result<ExecutionOutcome> {
        let (prepared, execution_id, mut execution, input) =
            self.prepare_invocation(func, kwargs)?;
        let body_result = match &func.body {
            FunctionBody::Sync(body) => body(input),
            FunctionBody::Async(_) => {
                return Err(Error::AsyncOnly(func.metadata.name.clone()))
            }
        };
        self.conclude(func, &prepared, execution_id, &mut execution, body_result)
    }

    async fn run_pipeline_async(
        &self,
        func: &RegisteredFunction,
        body: AsyncBody,
        kwargs: Kwargs,
    ) -> Result<ExecutionOutcome> {
        let (prepared, execution_id, mut execution, input) =
            self.prepare_invocation(func, kwargs)?;
        let body_result = body(input).await;
        self.conclude(func, &prepared, execution_id, &mut execution, body_result)
    }

    fn prepare_invocation(
        &self,
        func: &RegisteredFunction,
        kwargs: Kwargs,
    ) -> Result<(PreparedInputs, ExecutionId, Entity, ExecutionInput)> {
        let md = &func.metadata;
        let prepared = prepare(&self.store, &md.name, &md.signature, &md.artifacts, kwargs)?;
        let execution_id = ExecutionId::new();
        let execution = execution::begin_execution(
            &md.name,
            execution_id,
            prepared.strategy,
            &prepared.input_version_ids,
            prepared.config_version_id,
            Utc::now(),
        );
        let input = ExecutionInput::new(&prepared);
        Ok((prepared, execution_id, execution, input))
    }

    /// Analyse the body's return, register outputs and the execution record
    ///
    /// Failures (the body's or the analysis') register a failed execution
    /// record and re-raise; outputs that were not yet registered are
    /// simply dropped with the error.
    fn conclude(
        &self,
        func: &RegisteredFunction,
        prepared: &PreparedInputs,
        execution_id: ExecutionId,
        execution: &mut Entity,
        body_result: FnResult,
    ) -> Result<ExecutionOutcome> {
        let md = &func.metadata;
        let analysed = body_result
            .map_err(|source| Error::FunctionFailed {
                name: md.name.clone(),
                source,
            })
            .and_then(|value| {
                let outputs = unpack(&md.name, &md.signature.returns, &md.artifacts, value)?;
                process_outputs(
                    &self.store,
                    &md.name,
                    execution_id,
                    execution.version_id(),
                    prepared,
                    outputs,
                )
            });

        match analysed {
            Ok(processed) => {
                let output_versions: Vec<VersionId> =
                    processed.iter().map(|p| p.record.version_id()).collect();
                execution::finish_success(execution, &output_versions, Utc::now());
                self.store.register_root(execution)?;
                let (records, semantics) = processed
                    .into_iter()
                    .map(|p| (p.record, p.semantic))
                    .unzip();
                Ok(ExecutionOutcome {
                    records,
                    semantics,
                    execution_id,
                    execution_version_id: execution.version_id(),
                    strategy: prepared.strategy,
                })
            }
            Err(error) => {
                execution::finish_failure(execution, &error, Utc::now());
                // Best effort: the failed execution is still part of the
                // history unless the store itself is the problem.
                let _ = self.store.register_root(execution);
                Err(error)
            }
        }
    }
}

fn finish_event(outcome: &ExecutionOutcome, event: Event) -> Event {
    event
        .with_metadata("outputs", outcome.records.len().to_string())
        .with_metadata("strategy", outcome.strategy.tag())
        .with_context("execution", outcome.execution_version_id)
}
