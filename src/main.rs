//! tooldock - remote-tool acquisition and lifecycle server
//!
//! Main binary entry point that delegates to the CLI implementation.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tooldock_cli::main().await
}
