use dbhub_mcp::{
    config::Config,
    database::build_adapter,
    logging,
    mcp::server::Dispatcher,
    transport::{HttpTransport, StdioTransport, TransportKind},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let adapter = build_adapter(&config.database_config());
    let dispatcher = Dispatcher::new(adapter, config.dispatcher_settings());

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    info!(
        transport = %config.transport,
        database = %config.db_kind,
        db_path = %config.db_path.display(),
        read_only = config.db_read_only,
        "server starting"
    );

    match config.transport {
        TransportKind::Stdio => {
            let mut transport = StdioTransport::stdio();
            dispatcher.run(&mut transport, shutdown).await?;
        }
        TransportKind::Http => {
            let mut transport = HttpTransport::new(config.http_transport_config()?);
            dispatcher.run(&mut transport, shutdown).await?;
        }
    }

    info!("server stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    shutdown.cancel();
}
