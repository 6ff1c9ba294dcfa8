use std::sync::Arc;

use anyhow::{Context, Result};

use meridian::catalog::MapCatalog;
use meridian::config::ServerConfig;
use meridian::core::{create_server_state, wait_for_shutdown};
use meridian::servers::world::WorldState;
use meridian::timer::TimerQueue;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut conf_file = "conf/server.yaml".to_string();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: world_server [--conf FILE]");
                return Ok(());
            }
            "--conf" => {
                if i + 1 < args.len() {
                    i += 1;
                    conf_file = args[i].clone();
                } else {
                    eprintln!("Error: --conf requires a FILE argument");
                    return Ok(());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let config = ServerConfig::from_file(&conf_file)
        .with_context(|| format!("Cannot load config: {}", conf_file))?;

    if config.hosted_maps.is_empty() {
        anyhow::bail!("world_server needs at least one entry in hosted_maps");
    }

    let catalog = Arc::new(
        MapCatalog::from_file(&config.map_catalog)
            .with_context(|| format!("Cannot load map catalog: {}", config.map_catalog))?,
    );

    let timer = TimerQueue::new();
    tokio::spawn(Arc::clone(&timer).run());

    let state = Arc::new(WorldState::new(config, timer, catalog));
    tokio::spawn(WorldState::run(state));

    let server_state = create_server_state();
    wait_for_shutdown(server_state).await;
    tracing::info!("[world] [exit]");
    Ok(())
}
