pub mod bins;

pub use bins::IngestResponse;
