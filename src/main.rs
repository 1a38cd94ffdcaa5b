use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use keygate::config::{self, Config};
use keygate::models::{CreateApiKeyRequest, ListApiKeysParams, UpdateApiKeyRequest};
use keygate::{api, ApiKeyService, AppState, PgStore};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url, cfg.max_connections).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Key { command }) => {
            let db = PgStore::connect(&cfg.database_url, cfg.max_connections).await?;
            let keys = ApiKeyService::from_config(Arc::new(db), &cfg)?;
            handle_key_command(command, &keys).await
        }
        Some(cli::Commands::Permissions) => {
            let catalog = cfg.permission_catalog();
            println!("{:<24} {:<12} DESCRIPTION", "NAME", "CATEGORY");
            for p in catalog.entries() {
                println!("{:<24} {:<12} {}", p.name, p.category, p.description);
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Stdout logging (text, or JSON with `KEYGATE_LOG_FORMAT=json`), plus an
/// OTLP exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "keygate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = std::env::var("KEYGATE_LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (text_layer, json_layer) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "keygate=debug,tower_http=info".into()),
        ))
        .with(telemetry_layer)
        .with(text_layer)
        .with(json_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url, cfg.max_connections).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let state = Arc::new(AppState::new(Arc::new(db), cfg)?);
    tracing::info!(
        permissions = state.keys.catalog().len(),
        "permission catalog loaded"
    );

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("keygate listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_key_command(cmd: cli::KeyCommands, keys: &ApiKeyService) -> anyhow::Result<()> {
    match cmd {
        cli::KeyCommands::Create {
            name,
            description,
            owner,
            permissions,
            expiry_days,
            rate_limit,
        } => {
            let key = keys
                .create(CreateApiKeyRequest {
                    name,
                    description,
                    owner_id: owner,
                    permissions,
                    expiry_days,
                    rate_limit,
                })
                .await?;
            println!(
                "API key created:\n  ID:          {}\n  Name:        {}\n  Key:         {}\n  Permissions: {}\n  Expires:     {}",
                key.id,
                key.name,
                key.secret,
                key.permissions.join(","),
                format_time(key.expires_at),
            );
            println!("\nStore the key now; it will not be shown again.");
        }
        cli::KeyCommands::List {
            search,
            active,
            owner,
            page,
            limit,
        } => {
            let result = keys
                .list(ListApiKeysParams {
                    page: Some(page),
                    limit: Some(limit),
                    search,
                    is_active: active,
                    owner_id: owner,
                })
                .await?;
            if result.api_keys.is_empty() {
                println!("No API keys found.");
            } else {
                println!(
                    "{:<38} {:<24} {:<20} {:<8} {:<10}",
                    "ID", "NAME", "KEY", "ACTIVE", "USES"
                );
                for k in &result.api_keys {
                    println!(
                        "{:<38} {:<24} {:<20} {:<8} {:<10}",
                        k.id, k.name, k.key, k.is_active, k.usage_count
                    );
                }
                let p = &result.pagination;
                println!("\nPage {} of {} ({} keys)", p.page, p.total_pages, p.total);
            }
        }
        cli::KeyCommands::Show { id } => {
            let key = keys.get(parse_id(&id)?).await?.summary();
            println!("{}", serde_json::to_string_pretty(&key)?);
        }
        cli::KeyCommands::Update {
            id,
            name,
            description,
            permissions,
            active,
            rate_limit,
        } => {
            let key = keys
                .update(
                    parse_id(&id)?,
                    UpdateApiKeyRequest {
                        name,
                        description,
                        permissions,
                        is_active: active,
                        rate_limit,
                    },
                )
                .await?;
            println!("API key {} updated.", key.id);
        }
        cli::KeyCommands::Renew { id, extend_days } => {
            let key = keys.renew(parse_id(&id)?, extend_days).await?;
            println!(
                "API key {} renewed; expires {}.",
                key.id,
                format_time(key.expires_at)
            );
        }
        cli::KeyCommands::Delete { id } => {
            keys.delete(parse_id(&id)?).await?;
            println!("API key deleted.");
        }
    }
    Ok(())
}

fn parse_id(id: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(id).context("Invalid API key ID")
}

fn format_time(t: Option<chrono::DateTime<chrono::Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into())
}
