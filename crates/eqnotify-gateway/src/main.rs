//! # eqnotify-gateway
//!
//! Notification gateway binary: loads settings, wires the verifier into the
//! server and runs until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use eqnotify_auth::{Identity, JwtVerifier, issue_token};
use eqnotify_server::{NotifyServer, ServerConfig};
use eqnotify_settings::NotifySettings;

/// Real-time notification gateway for the equipment admin application.
#[derive(Parser, Debug)]
#[command(name = "eqnotify-gateway", version, about = "Equipment notification gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server (default).
    Serve(ServeArgs),
    /// Print a signed token for the configured secret.
    IssueToken(IssueTokenArgs),
}

#[derive(Args, Debug, Default, Clone)]
struct ServeArgs {
    /// JSON settings file (camelCase keys).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter directive, e.g. `debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Debug)]
struct IssueTokenArgs {
    /// JSON settings file the secret is read from.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Admin-application user id.
    #[arg(long)]
    user_id: String,

    /// Login name.
    #[arg(long)]
    username: String,

    /// Role name, e.g. `ADMIN`.
    #[arg(long)]
    role: String,

    /// Token lifetime in seconds (defaults to `auth.tokenTtlSecs`).
    #[arg(long)]
    ttl_secs: Option<u64>,
}

fn load(config: Option<&Path>) -> Result<NotifySettings> {
    eqnotify_settings::load_settings(config).with_context(|| match config {
        Some(path) => format!("Failed to load settings from {}", path.display()),
        None => "Failed to load settings".to_string(),
    })
}

/// CLI flags win over file and environment.
fn apply_cli(settings: &mut NotifySettings, args: &ServeArgs) {
    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(level) = &args.log_level {
        settings.logging.level.clone_from(level);
    }
    if args.json_logs {
        settings.logging.json = true;
    }
}

fn server_config(settings: &NotifySettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        outbound_queue_capacity: server.outbound_queue_capacity,
        max_message_size: server.max_message_size,
        auth_timeout_secs: server.auth_timeout_secs,
        shutdown_timeout_secs: server.shutdown_timeout_secs,
        simulator_interval_secs: settings
            .simulator_enabled()
            .then_some(settings.simulator.interval_secs),
    }
}

/// Resolve once SIGINT or SIGTERM arrives.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let mut settings = load(args.config.as_deref())?;
    apply_cli(&mut settings, args);

    eqnotify_server::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    eqnotify_settings::validate(&settings).context("Invalid settings")?;

    let metrics = eqnotify_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let verifier = Arc::new(JwtVerifier::new(settings.auth.jwt_secret.as_bytes()));
    let server = NotifyServer::new(server_config(&settings), verifier).with_metrics(metrics);

    let (addr, mut handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        environment = settings.environment.as_str(),
        simulator = settings.simulator_enabled(),
        "notification gateway listening on ws://{addr}/ws"
    );

    tokio::select! {
        res = shutdown_signal() => res?,
        _ = &mut handle => tracing::error!("listener exited unexpectedly"),
    }

    tracing::info!("Shutting down...");
    let drained = server.stop().await;
    if !handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!(drained, "Shutdown complete");
    Ok(())
}

fn issue(args: &IssueTokenArgs) -> Result<String> {
    let settings = load(args.config.as_deref())?;
    let identity = Identity::new(&args.user_id, &args.username, &args.role);
    let ttl = Duration::from_secs(args.ttl_secs.unwrap_or(settings.auth.token_ttl_secs));
    issue_token(settings.auth.jwt_secret.as_bytes(), &identity, ttl).context("Failed to sign token")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None => serve(&cli.serve).await,
        Some(Command::Serve(mut args)) => {
            if args.config.is_none() {
                args.config.clone_from(&cli.serve.config);
            }
            serve(&args).await
        }
        Some(Command::IssueToken(mut args)) => {
            if args.config.is_none() {
                args.config.clone_from(&cli.serve.config);
            }
            let token = issue(&args)?;
            println!("{token}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eqnotify_auth::TokenVerifier;
    use eqnotify_settings::Environment;
    use std::io::Write;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["eqnotify-gateway"]);
        assert!(cli.command.is_none());
        assert!(cli.serve.port.is_none());
        assert!(!cli.serve.json_logs);
    }

    #[test]
    fn cli_top_level_flags() {
        let cli = Cli::parse_from([
            "eqnotify-gateway",
            "--port",
            "4000",
            "--host",
            "127.0.0.1",
            "--json-logs",
        ]);
        assert_eq!(cli.serve.port, Some(4000));
        assert_eq!(cli.serve.host.as_deref(), Some("127.0.0.1"));
        assert!(cli.serve.json_logs);
    }

    #[test]
    fn cli_serve_subcommand() {
        let cli = Cli::parse_from([
            "eqnotify-gateway",
            "serve",
            "--config",
            "/tmp/notify.json",
            "--log-level",
            "debug",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.config, Some(PathBuf::from("/tmp/notify.json")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn cli_issue_token() {
        let cli = Cli::parse_from([
            "eqnotify-gateway",
            "issue-token",
            "--user-id",
            "7",
            "--username",
            "alice",
            "--role",
            "ADMIN",
            "--ttl-secs",
            "60",
        ]);
        let Some(Command::IssueToken(args)) = cli.command else {
            panic!("expected issue-token");
        };
        assert_eq!(args.user_id, "7");
        assert_eq!(args.ttl_secs, Some(60));
    }

    #[test]
    fn cli_flags_override_settings() {
        let mut settings = NotifySettings::default();
        let args = ServeArgs {
            host: Some("127.0.0.1".into()),
            port: Some(9000),
            log_level: Some("trace".into()),
            json_logs: true,
            ..ServeArgs::default()
        };
        apply_cli(&mut settings, &args);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "trace");
        assert!(settings.logging.json);
    }

    #[test]
    fn server_config_maps_settings() {
        let mut settings = NotifySettings::default();
        settings.server.max_connections = 12;
        settings.server.auth_timeout_secs = Some(15);
        let cfg = server_config(&settings);
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.max_connections, 12);
        assert_eq!(cfg.auth_timeout_secs, Some(15));
        assert!(cfg.simulator_interval_secs.is_none());
    }

    #[test]
    fn simulator_enabled_in_development() {
        let mut settings = NotifySettings::default();
        settings.environment = Environment::Development;
        assert_eq!(server_config(&settings).simulator_interval_secs, Some(60));
    }

    #[test]
    fn issue_uses_secret_from_settings_file() {
        // JWT_SECRET in the test environment would win over the file.
        if std::env::var("JWT_SECRET").is_ok() {
            return;
        }
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let body = serde_json::json!({"auth": {"jwtSecret": "file-secret"}});
        file.write_all(body.to_string().as_bytes()).unwrap();

        let args = IssueTokenArgs {
            config: Some(file.path().to_path_buf()),
            user_id: "7".into(),
            username: "alice".into(),
            role: "ADMIN".into(),
            ttl_secs: Some(60),
        };
        let token = issue(&args).unwrap();
        let identity = JwtVerifier::new(b"file-secret").verify(&token).unwrap();
        assert_eq!(identity, Identity::new("7", "alice", "ADMIN"));
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let err = load(Some(Path::new("/definitely/not/here.json"))).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
