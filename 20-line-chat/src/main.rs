use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use line_chat::{
    cli::{Cli, Command},
    client,
    server::Server,
    store::CredentialStore,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let store = CredentialStore::open(&args.db).with_context(|| {
                format!("failed to open credential store {}", args.db.display())
            })?;
            let server = Server::bind(args.listen_addr(), store)
                .await?
                .with_queue_capacity(args.queue_capacity);
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
