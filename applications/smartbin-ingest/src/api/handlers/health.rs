/// Health check endpoint handler
/// Returns "OK" with 200 status code
pub async fn health() -> &'static str {
    "OK"
}

pub async fn index() -> &'static str {
    "SmartBin ingest is running!"
}
