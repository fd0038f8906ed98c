mod args;
mod logging;

use std::path::Path;

use clap::Parser;
use sql_queue::prelude::*;

use crate::args::{Args, TransportKind};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = logging::init(args.verbose, args.log.as_deref()) {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(args).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), SqlQueueError> {
    let mut builder = SqlQueue::builder(&args.db)
        .commit_after_idle(args.commit_after_idle)
        .auto_backup(args.backup_after_idle)
        .backup_on_start(args.backup_on_start)
        .backup_on_stop(!args.no_backup_on_stop);
    if let Some(dir) = &args.backup_dir {
        builder = builder.backup_dir(dir);
    }
    let queue = builder.open()?;

    let handle = match args.transport {
        TransportKind::Plain => {
            let server = RpcServer::new(queue.clone(), PlainTransport);
            bind(server, args.addr).await?
        }
        TransportKind::Encrypted => {
            let keypair = load_or_create_key(args.key_file.as_deref())?;
            tracing::info!(public_key = %keypair.public_hex(), "clients must trust this key");
            let server = RpcServer::new(queue.clone(), EncryptedTransport::server(keypair));
            bind(server, args.addr).await?
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    tokio::task::spawn_blocking(move || queue.stop())
        .await
        .map_err(|err| SqlQueueError::Other(format!("stop task failed: {err}")))?
}

async fn bind<T: Transport>(
    server: RpcServer<T>,
    addr: Option<std::net::SocketAddr>,
) -> Result<ServerHandle, SqlQueueError> {
    match addr {
        Some(addr) => server.bind_to(addr).await,
        None => server.bind().await,
    }
}

fn load_or_create_key(path: Option<&Path>) -> Result<ServerKeypair, SqlQueueError> {
    let Some(path) = path else {
        return ServerKeypair::generate();
    };
    if path.exists() {
        return ServerKeypair::from_pkcs8(&std::fs::read(path)?);
    }
    let keypair = ServerKeypair::generate()?;
    std::fs::write(path, keypair.pkcs8_bytes())?;
    tracing::info!(path = %path.display(), "wrote new server identity");
    Ok(keypair)
}
