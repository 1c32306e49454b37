#![cfg_attr(not(test), deny(clippy::panic))]

use blokus_server::config;
use blokus_server::logging;
use blokus_server::server::GameServer;
use clap::Parser;

/// Blokus Server -- authoritative TCP server for online multiplayer Blokus
#[derive(Parser, Debug)]
#[command(name = "blokus-server")]
#[command(about = "Authoritative TCP game server for online multiplayer Blokus")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration comes from environment variables; unset values fall
    // back to compiled-in defaults.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate_config(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.server.port);
                println!("  Max clients: {}", cfg.server.max_clients);
                println!("  Database backend: {}", cfg.database.backend);
                println!("  JWT login enabled: {}", cfg.auth.jwt_enabled());
                println!("  Turn time limit: {}s", cfg.server.turn_time_limit);
                println!("  AFK threshold: {}", cfg.server.afk_timeout_threshold);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validation_result.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    // The guard flushes buffered file logs when main returns.
    let _log_guard = logging::init_with_config(&cfg.logging);

    // SERVER_THREAD_POOL_SIZE drives the worker pool servicing all IO,
    // timers, and room operations.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.server.thread_pool_size.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        tracing::info!(
            port = cfg.server.port,
            db = %cfg.database.name,
            "Starting Blokus server"
        );
        if cfg.server.debug_mode {
            // Secrets stay out of the logs.
            tracing::info!(
                max_clients = cfg.server.max_clients,
                threads = cfg.server.thread_pool_size,
                db_host = %cfg.database.host,
                db_user = %cfg.database.user,
                db_name = %cfg.database.name,
                turn_time_limit = cfg.server.turn_time_limit,
                afk_threshold = cfg.server.afk_timeout_threshold,
                jwt_enabled = cfg.auth.jwt_enabled(),
                "Configuration"
            );
        }
        let server = GameServer::new(cfg).await?;
        server.run().await
    })
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["blokus-server"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_short() {
        let cli = Cli::try_parse_from(["blokus-server", "-c"]).unwrap();
        assert!(cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_print_config() {
        let cli = Cli::try_parse_from(["blokus-server", "--print-config"]).unwrap();
        assert!(cli.print_config);
    }

    #[test]
    fn test_cli_validate_and_print_config_conflict() {
        let result =
            Cli::try_parse_from(["blokus-server", "--validate-config", "--print-config"]);
        assert!(result.is_err());
    }
}
