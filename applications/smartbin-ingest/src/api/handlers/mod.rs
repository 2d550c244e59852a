pub mod bins;
pub mod health;

use crate::ingest::Ingestor;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
}
