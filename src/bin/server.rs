use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use sable::net::Reactor;
use sable::{ExecutorPool, ReactorError, Server, ServerConfig};

fn main() {
    pretty_env_logger::init();

    let mut config = ServerConfig::new().unwrap_or_else(|err| {
        log::warn!("failed to load configuration: {}; using defaults", err);
        ServerConfig::default()
    });

    let mut args = std::env::args().skip(1);
    if let Some(port) = args.next() {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                eprintln!("usage: sable-server <port> [doc_root]");
                process::exit(2);
            }
        }
    }
    if let Some(doc_root) = args.next() {
        config.doc_root = PathBuf::from(doc_root);
    }

    if let Err(err) = serve(config) {
        log::error!("server failed: {}", err);
        process::exit(1);
    }
}

fn serve(config: ServerConfig) -> Result<(), ReactorError> {
    let reactor = Reactor::new()?;
    let executors = Arc::new(ExecutorPool::new(
        config.pool_size,
        Some(config.max_workers),
        Some(config.worker_keep_alive()),
    ));
    let server = Server::bind(
        &reactor,
        (config.host.as_str(), config.port),
        executors,
        config.doc_root.clone(),
    )?;
    server.run();
    Ok(())
}
