//! File upload workflow
//!
//! Records an uploaded report file, then enriches its metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;
use waypoint::prelude::*;

use super::user_signup::record_error;
use crate::records::{Document, NewDocument, RecordStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUploadOutput {
    pub document: Document,
}

pub struct FileUpload {
    records: Arc<dyn RecordStore>,
}

impl FileUpload {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Workflow for FileUpload {
    const NAME: &'static str = "file_upload";
    type Input = NewDocument;
    type Output = FileUploadOutput;

    async fn run(
        &self,
        ctx: &mut WorkflowContext,
        payload: NewDocument,
    ) -> Result<FileUploadOutput, WorkflowError> {
        if !ctx.is_replaying() {
            info!(run_id = %ctx.run_id(), report_id = %payload.report_id, "handling file upload");
        }

        let records = &self.records;
        let base_metadata = payload.metadata.clone();

        let document: Document = ctx
            .call(
                "create_report_document",
                payload,
                |_, payload: NewDocument| async move {
                    records.insert_document(payload).await.map_err(record_error)
                },
            )
            .await?;

        let document = ctx
            .call(
                "update_document_metadata",
                (document, base_metadata),
                |_, (document, base): (Document, Map<String, Value>)| async move {
                    let metadata = enrich_metadata(&document, base);
                    records
                        .update_document_metadata(&document.id, metadata)
                        .await
                        .map_err(record_error)
                },
            )
            .await?;

        Ok(FileUploadOutput { document })
    }
}

/// Caller metadata plus the fields derived from the upload
fn enrich_metadata(document: &Document, mut metadata: Map<String, Value>) -> Map<String, Value> {
    metadata.insert("type".to_string(), json!("Excel"));
    metadata.insert(
        "summary".to_string(),
        json!(format!(
            "{} uploaded for report {}",
            document.original_filename, document.report_id
        )),
    );
    metadata
}
