//! Courier CLI - main entry point

use clap::Parser;
use tracing::{error, info};

use courier_cli::{
    app::CourierApp,
    cli::{Cli, Commands},
    config::AppConfig,
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = load_configuration(&cli)?;
    if let Commands::Chat { name } = &cli.command {
        config.identity.name = Some(name.clone());
    }

    let app = CourierApp::new(&config, cli.unreliable)?;
    if let Err(e) = app.connect().await {
        error!("Failed to connect: {}", e);
        std::process::exit(1);
    }

    let outcome = match cli.command {
        Commands::Chat { name } => app.run_chat(&name).await,
        Commands::Send {
            reply_to,
            json,
            message,
        } => send(&app, message, reply_to, json).await,
    };

    app.stop().await?;
    if let Err(e) = outcome {
        error!("Command execution failed: {}", e);
        std::process::exit(1);
    }

    info!("Courier CLI exited successfully");
    Ok(())
}

async fn send(app: &CourierApp, message: String, reply_to: Option<String>, json: bool) -> Result<()> {
    let activity = app.send_message(message, reply_to).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&activity)?);
    } else {
        let id = activity.id.as_ref().map(|id| id.to_string()).unwrap_or_default();
        println!("Message confirmed (ID: {})", id);
    }
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        AppConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}
