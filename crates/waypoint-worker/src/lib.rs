pub mod config;
pub mod records;
pub mod telemetry;
pub mod workflows;

use std::sync::Arc;

use waypoint::workflow::RegistryError;
use waypoint::WorkflowEngine;

pub use config::WorkerConfig;
pub use records::{InMemoryRecordStore, RecordError, RecordStore};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use workflows::{ClassifyDocs, FileUpload, UserSignup};

/// Build an engine with every application workflow registered
pub fn build_engine(
    config: &WorkerConfig,
    records: Arc<dyn RecordStore>,
) -> Result<WorkflowEngine, RegistryError> {
    let signup =
        UserSignup::new(records.clone()).with_welcome_failure_rate(config.welcome_failure_rate);

    Ok(WorkflowEngine::builder()
        .config(config.engine.clone())
        .register(signup)?
        .register(FileUpload::new(records))?
        .register(ClassifyDocs)?
        .build())
}
