use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;

use meridian::config::ServerConfig;
use meridian::core::{create_server_state, wait_for_shutdown};
use meridian::servers::login::LoginState;

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
                println!("Usage: login_server [--conf FILE]");
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

    let pool = MySqlPoolOptions::new()
        .max_connections(8)
        .connect(&config.db_url())
        .await
        .context("Cannot connect to account database")?;

    let bind = config.login_addr();
    let state = Arc::new(LoginState::new(Some(pool), config));
    tokio::spawn(async move {
        if let Err(e) = LoginState::run(state, &bind).await {
            tracing::error!("[login] [fatal] err={}", e);
        }
    });

    let server_state = create_server_state();
    wait_for_shutdown(server_state).await;
    tracing::info!("[login] [exit]");
    Ok(())
}
