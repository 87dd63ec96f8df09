//! Query Frontend Service - Entry Point
//!
//! Accepts synchronous round trips from the edge and dispatches them to the
//! scheduler fleet over persistent streams.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    query_frontend_server::run().await
}
