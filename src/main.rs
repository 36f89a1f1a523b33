use anyhow::Result;
use std::sync::Arc;

use qbo_gateway::auth::{AuthManager, Credential, CredentialStore, EnvFileStore, SqliteStore};
use qbo_gateway::config::{Command, Config, StoreKind};
use qbo_gateway::http_client::QboHttpClient;
use qbo_gateway::query::QueryExecutor;
use qbo_gateway::reports::{DirArchive, ReportFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e);
    }

    tracing::info!(
        "QBO Gateway {} (realm {}, api {})",
        env!("CARGO_PKG_VERSION"),
        config.realm_id,
        config.base_url
    );

    let store: Arc<dyn CredentialStore> = match config.credential_store {
        StoreKind::EnvFile => Arc::new(EnvFileStore::new(config.credential_file.clone())),
        StoreKind::Sqlite => Arc::new(SqliteStore::new(config.credential_file.clone())),
    };
    tracing::info!("Credential store: {}", store.describe());

    let auth_manager = Arc::new(AuthManager::new(
        Credential::new(
            config.access_token.clone(),
            config.refresh_token.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.realm_id.clone(),
        ),
        store,
        config.token_url.clone(),
        config.http_request_timeout,
        config.token_refresh_threshold,
    )?);

    let http_client = Arc::new(QboHttpClient::new(
        auth_manager.clone(),
        config.base_url.clone(),
        config.minor_version.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);

    match &config.command {
        Command::Exchange { code, redirect_uri } => {
            let creds = auth_manager
                .exchange_authorization_code(code, redirect_uri)
                .await?;
            tracing::info!(
                "✅ Authorization code exchanged (token: {}...)",
                creds.access_token_prefix()
            );
            println!("ACCESS_TOKEN={}", creds.access_token);
            println!("REFRESH_TOKEN={}", creds.refresh_token);
        }

        Command::Pull { reports, rows } => {
            let fetcher = ReportFetcher::new(http_client)
                .with_archive(Arc::new(DirArchive::new(config.raw_reports_dir.clone())));

            for name in reports {
                let table = fetcher.fetch_table(name).await?;
                if !table.has_columns() {
                    tracing::warn!(report = %name, "Report has no columns");
                }
                tracing::info!(
                    "Top {} rows of {} ({} total):\n{}",
                    rows,
                    name,
                    table.rows.len(),
                    table.render(*rows)
                );
            }
            tracing::info!("All reports fetched!");
        }

        Command::Query { statement } => {
            let executor = QueryExecutor::new(http_client);
            let records = executor.query(statement).await?;
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
            tracing::info!("Query returned {} records", records.len());
        }
    }

    Ok(())
}
