use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Server;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, ValueEnum};
use hyper_util::rt::TokioTimer;
use tracing::{info, warn};

use snippetbox_db::{Database, SqliteSnippets, SqliteUsers};
use snippetbox_web::session::SessionManager;
use snippetbox_web::templates::TemplateCache;
use snippetbox_web::{AppState, router::router};

const DEFAULT_SECRET: &str = "s6Ndh+pPbnzHbS*+9Pk8qGWhTzbpa@ge";

/// Drop clients that take too long to send their request head.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Environment {
    Development,
    Production,
}

#[derive(Debug, Parser)]
#[command(name = "snippetbox", about = "Snippetbox web application")]
struct Args {
    /// HTTP network address (":4000" listens on all interfaces)
    #[arg(long, default_value = ":4000")]
    addr: String,

    /// SQLite database path
    #[arg(long, default_value = "snippetbox.db")]
    dsn: PathBuf,

    /// Session signing key (32 bytes)
    #[arg(long, default_value = DEFAULT_SECRET)]
    secret: String,

    /// Development serves TLS from --tls-cert/--tls-key, production a
    /// plain listener (expected to sit behind a terminating proxy)
    #[arg(long, value_enum, default_value = "development")]
    environment: Environment,

    /// Directory holding html/ templates and static/ assets
    #[arg(long, default_value = "./ui")]
    ui_dir: PathBuf,

    #[arg(long, default_value = "./tls/cert.pem")]
    tls_cert: PathBuf,

    #[arg(long, default_value = "./tls/key.pem")]
    tls_key: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "snippetbox_web=debug,snippetbox_db=debug,tower_http=info".into()
                }),
        )
        .init();

    let args = Args::parse();

    if args.environment == Environment::Production && args.secret == DEFAULT_SECRET {
        warn!("running in production with the default session secret; set --secret");
    }

    // Database and stores
    let db = Arc::new(Database::open(&args.dsn)?);
    let snippets = Arc::new(SqliteSnippets::new(db.clone()));
    let users = Arc::new(SqliteUsers::new(db));

    // Template cache
    let templates = TemplateCache::new(&args.ui_dir.join("html"))?;

    let state = AppState {
        snippets,
        users,
        templates,
        sessions: SessionManager::new(args.secret.as_bytes()),
    };

    let app = router(state, args.ui_dir.join("static"))
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = parse_addr(&args.addr)?;
    info!("Starting server on {}", addr);

    match args.environment {
        Environment::Production => {
            let mut server = axum_server::bind(addr);
            set_timeouts(&mut server);
            server.serve(app).await?;
        }
        Environment::Development => {
            let tls = RustlsConfig::from_pem_file(&args.tls_cert, &args.tls_key).await?;
            let mut server = axum_server::bind_rustls(addr, tls);
            set_timeouts(&mut server);
            server.serve(app).await?;
        }
    }

    Ok(())
}

/// Apply the slow-client timeouts to a listener. hyper's http1 timeouts
/// need an explicit timer.
fn set_timeouts<A>(server: &mut Server<A>) {
    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);
}

/// Accept Go-style ":4000" as shorthand for all interfaces.
fn parse_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {}", addr, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_shorthand() {
        assert_eq!(
            parse_addr(":4000").unwrap(),
            "0.0.0.0:4000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_addr("nonsense").is_err());
    }
}
