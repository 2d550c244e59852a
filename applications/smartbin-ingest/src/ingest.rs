use crate::envelope::{excerpt, Decoder, RawReading};
use crate::error::AppError;
use crate::model::{BinPatch, BinRecord};
use crate::repositories::BinStore;
use crate::validate::validate;
use std::sync::Arc;
use tracing::{debug, error, warn};

const PAYLOAD_EXCERPT_CHARS: usize = 128;

/// Decode → validate → upsert. One instance is shared by every listener and
/// by the HTTP ingestion route.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn BinStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn BinStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BinStore> {
        &self.store
    }

    /// Process one broker message to completion. Every failure is logged
    /// here and returned; none of them should end the caller's loop.
    pub async fn handle_message(
        &self,
        decoder: &Decoder,
        topic: &str,
        payload: &[u8],
    ) -> Result<BinRecord, AppError> {
        let raw = decoder.decode(payload).map_err(|e| {
            warn!(
                topic = %topic,
                error = %e,
                payload = %excerpt(payload, PAYLOAD_EXCERPT_CHARS),
                "dropping undecodable message"
            );
            AppError::from(e)
        })?;
        self.ingest(&raw, topic).await
    }

    /// Validate an already decoded reading and merge it into the store.
    pub async fn ingest(&self, raw: &RawReading, source: &str) -> Result<BinRecord, AppError> {
        let reading = validate(raw).map_err(|e| {
            warn!(
                source = %source,
                field = e.field(),
                value = %raw.get(e.field()).map(|v| v.to_string()).unwrap_or_default(),
                error = %e,
                "dropping invalid reading"
            );
            AppError::from(e)
        })?;

        let result = match BinPatch::try_from(&reading) {
            Ok(patch) => self.store.upsert(&patch).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => {
                debug!(source = %source, bin_id = %record.bin_id, fields = reading.fields.len(), "reading stored");
                Ok(record)
            }
            Err(e) => {
                error!(source = %source, bin_id = %reading.bin_id, error = %e, "failed to store reading");
                Err(e)
            }
        }
    }
}
