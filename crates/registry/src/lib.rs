//! Callable registry for the provenant framework
//!
//! This crate provides:
//! - signature: declared function signatures and the analyser that
//!   synthesises input/output schemas and the unpacking flag
//! - strategy: kwargs classification, execution strategies, and input
//!   isolation/composition
//! - semantic: output classification (creation / mutation / detachment)
//!   and multi-value unpacking
//! - execution: the FunctionExecution record type
//! - registry: the CallableRegistry orchestrating all of the above

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod execution;
pub mod kwargs;
pub mod registry;
pub mod semantic;
pub mod signature;
pub mod strategy;

pub use execution::{EXECUTION_TYPE_NAME, OUTCOME_FAILURE, OUTCOME_SUCCESS};
pub use kwargs::Kwargs;
pub use registry::{
    CallableRegistry, ExecutionOutcome, FnResult, FunctionBody, FunctionMetadata, FunctionSpec,
    FUNCTION_EXECUTED, FUNCTION_EXECUTING, FUNCTION_FAILED,
};
pub use semantic::{Confidence, SemanticKind, SemanticResult};
pub use signature::{
    FunctionSignature, ParamKind, ParamSpec, ReturnPattern, ReturnSpec, SignatureArtifacts,
};
pub use strategy::{ExecutionInput, ExecutionStrategy, PreparedInputs};
