use anyhow::Result;
use authgate::{AuthGateConfig, create_gate, load_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "Pluggable request authentication gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (/health, /login, /logout, /whoami)
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, env = "AUTHGATE_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
        /// Configuration file (defaults to the resolved authgate.json)
        #[arg(long, env = "AUTHGATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// List configured schemas and their authenticators
    Schemas {
        #[arg(long, env = "AUTHGATE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("authgate=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, config } => {
            let config = load_config(config.as_deref())?;
            let gate = Arc::new(create_gate(&config)?);
            info!(
                "Sweeping expired tokens every {}s",
                config.sweep_interval().as_secs()
            );

            let app = authgate::api::create_router(gate.clone());
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Server listening on http://{}", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            gate.shutdown();
            info!("Server stopped");
        }
        Commands::Schemas { config } => {
            let config = load_config(config.as_deref())?;
            print_schemas(&config);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn print_schemas(config: &AuthGateConfig) {
    if config.authentication.is_empty() {
        println!("No schemas configured.");
        return;
    }

    println!("{:<20} {:<10} {:<25}", "SCHEMA", "TYPE", "DETAIL");
    println!("{}", "-".repeat(55));

    for (schema, schema_config) in &config.authentication {
        let name = if schema.is_empty() { "(default)" } else { schema.as_str() };
        for entry in &schema_config.authenticators {
            let detail = match entry {
                authgate::config::AuthenticatorConfig::Header(h) => h.header_name.clone(),
                authgate::config::AuthenticatorConfig::Guest(g) => format!("user {}", g.user_id),
            };
            println!("{:<20} {:<10} {:<25}", name, entry.kind(), detail);
        }
    }

    if let Some(login) = &config.login {
        println!();
        println!("Login schema: {:?}", login.schema);
    }
}
