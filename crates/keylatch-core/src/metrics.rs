// Metrics for compare primitives and lock outcomes
// Published through the `metrics` facade; install any recorder to export them

use metrics::{counter, describe_counter, describe_gauge, gauge};

use crate::negotiate::ExecutionMode;
use crate::script::OpId;

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_gauge!(
        "keylatch_execution_mode",
        "Negotiated execution mode (0 uninitialized, 1 function, 2 script, 3 eval)"
    );
    describe_counter!(
        "keylatch_atomic_ops_total",
        "Total number of compare primitive calls"
    );
    describe_counter!(
        "keylatch_atomic_op_errors_total",
        "Total number of compare primitive calls that failed"
    );
    describe_counter!(
        "keylatch_lock_operations_total",
        "Total number of lock operations by outcome"
    );

    tracing::debug!("Keylatch metrics initialized");
}

fn mode_value(mode: ExecutionMode) -> f64 {
    match mode {
        ExecutionMode::Uninitialized => 0.0,
        ExecutionMode::ReusableFunction => 1.0,
        ExecutionMode::CachedScript => 2.0,
        ExecutionMode::RawEvaluation => 3.0,
    }
}

/// Publish the negotiated execution mode
pub fn set_execution_mode(mode: ExecutionMode) {
    gauge!("keylatch_execution_mode").set(mode_value(mode));
}

/// Record a compare primitive call
pub fn record_atomic_op(op: OpId, mode: ExecutionMode, success: bool) {
    counter!("keylatch_atomic_ops_total", "op" => op.as_str(), "mode" => mode.as_str())
        .increment(1);

    if !success {
        counter!("keylatch_atomic_op_errors_total", "op" => op.as_str(), "mode" => mode.as_str())
            .increment(1);
    }
}

/// Record a lock operation (`acquire`, `release`, `renew`, `verify`) and its outcome
pub fn record_lock_operation(operation: &'static str, outcome: &'static str) {
    counter!("keylatch_lock_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
}
