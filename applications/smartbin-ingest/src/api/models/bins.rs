use crate::model::BinRecord;
use serde::{Deserialize, Serialize};

/// Body returned by `POST /api/v1/bins` when the reading was stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub bin: BinRecord,
}

impl IngestResponse {
    pub fn stored(bin: BinRecord) -> Self {
        Self {
            status: "stored".into(),
            bin,
        }
    }
}
