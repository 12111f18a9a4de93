//! Function execution records
//!
//! Every invocation of a registered function is summarised by an entity of
//! type `FunctionExecution` carrying the function name, the input, output
//! and config versions, timestamps, the outcome and the strategy tag. It
//! participates in the store like any other record and is what output
//! records' `derived_from_execution_id` points back to.

use crate::strategy::ExecutionStrategy;
use chrono::{DateTime, Utc};
use provenant_core::{Entity, Error, ExecutionId, Value, VersionId};

/// Entity type name of execution records
pub const EXECUTION_TYPE_NAME: &str = "FunctionExecution";

/// Outcome field value for a successful invocation
pub const OUTCOME_SUCCESS: &str = "success";
/// Outcome field value for a failed invocation
pub const OUTCOME_FAILURE: &str = "failure";

/// Build the execution entity for an invocation that just started
pub fn begin_execution(
    function: &str,
    execution_id: ExecutionId,
    strategy: ExecutionStrategy,
    input_version_ids: &[VersionId],
    config_version_id: Option<VersionId>,
    started_at: DateTime<Utc>,
) -> Entity {
    Entity::new(EXECUTION_TYPE_NAME)
        .with_field("function", function)
        .with_field("execution_id", execution_id.to_string())
        .with_field("strategy", strategy.tag())
        .with_field("input_version_ids", version_list(input_version_ids))
        .with_field(
            "config_version_id",
            config_version_id
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
        )
        .with_field("started_at", started_at.to_rfc3339())
        .with_field("output_version_ids", Value::List(Vec::new()))
        .with_field("finished_at", Value::Null)
        .with_field("outcome", Value::Null)
        .with_field("error", Value::Null)
}

/// Fill in a successful outcome
pub fn finish_success(
    execution: &mut Entity,
    output_version_ids: &[VersionId],
    finished_at: DateTime<Utc>,
) {
    execution.set_field("output_version_ids", version_list(output_version_ids));
    execution.set_field("finished_at", finished_at.to_rfc3339());
    execution.set_field("outcome", OUTCOME_SUCCESS);
}

/// Fill in a failed outcome with the error summary
pub fn finish_failure(execution: &mut Entity, error: &Error, finished_at: DateTime<Utc>) {
    execution.set_field("finished_at", finished_at.to_rfc3339());
    execution.set_field("outcome", OUTCOME_FAILURE);
    execution.set_field("error", error.to_string());
}

fn version_list(versions: &[VersionId]) -> Value {
    Value::List(
        versions
            .iter()
            .map(|v| Value::String(v.to_string()))
            .collect(),
    )
}
