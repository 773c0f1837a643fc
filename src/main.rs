use quotebench::config::ServerConfig;
use quotebench::server::Server;
use quotebench::store::MemoryStore;
use quotebench::utils::ts_hm;
use quotebench::DynError;
use std::sync::Arc;
use std::time::Duration;

/// Graceful shutdown timeout: maximum time to wait for clean shutdown.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), DynError> {
    dotenv::dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[SERVER] Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(MemoryStore::with_default_universe());
    let server = Server::start(config, store)?;

    eprintln!("[SERVER] {} Running; press Ctrl-C to stop", ts_hm());
    tokio::signal::ctrl_c().await?;
    eprintln!("[SHUTDOWN] {} Ctrl-C received", ts_hm());

    let shutdown = tokio::task::spawn_blocking(move || server.shutdown());
    match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), shutdown).await {
        Ok(Ok(summary)) => {
            eprintln!(
                "[SHUTDOWN] Summary: {}",
                serde_json::to_string(&summary).unwrap_or_else(|_| "<unserializable>".to_string())
            );
        }
        Ok(Err(e)) => eprintln!("[SHUTDOWN] Shutdown task failed: {}", e),
        Err(_) => eprintln!(
            "[SHUTDOWN] Timed out after {}s waiting for threads",
            SHUTDOWN_TIMEOUT_SECS
        ),
    }

    Ok(())
}
