//! Demo state replicated by the agent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syncer::{PatchOp, PatchOpRouter, PatchOpSet};
use syncer_core::RouterError;

/// Telemetry snapshot published by the server role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Number of updates since start
    pub counter: u64,
    /// Latest sensor readings by name
    pub readings: BTreeMap<String, f64>,
}

impl Telemetry {
    /// Produce the next snapshot.
    ///
    /// The temperature follows a sawtooth; pressure appears on even ticks
    /// and disappears on odd ones so that every operation kind shows up.
    pub fn advance(&mut self) {
        self.counter += 1;
        let step = u32::try_from(self.counter % 10).unwrap_or_default();
        self.readings
            .insert("temperature".to_string(), 20.0 + f64::from(step) * 0.5);

        if self.counter % 2 == 0 {
            self.readings
                .insert("pressure".to_string(), 1000.0 + f64::from(step));
        } else {
            self.readings.remove("pressure");
        }
    }
}

/// Router logging every routed change.
///
/// # Errors
///
/// Returns error if a route pattern is invalid.
pub fn logging_router() -> Result<PatchOpRouter<Telemetry>, RouterError> {
    let mut router = PatchOpRouter::new();

    router.add_callback(
        "/counter",
        PatchOp::Add | PatchOp::Replace,
        |previous: &Telemetry, _, _, value: Option<u64>| {
            tracing::info!(previous = previous.counter, ?value, "Counter changed");
        },
    )?;

    router.add_callback(
        "/readings/([^/]+)",
        PatchOpSet::ANY,
        |_: &Telemetry, captures, op, value: Option<f64>| {
            tracing::info!(name = &captures[1], %op, ?value, "Reading changed");
        },
    )?;

    Ok(router)
}
