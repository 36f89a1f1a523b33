// Integration tests for QBO Gateway
//
// These tests drive the public API end to end against mock token, report
// and query endpoints, with real credential stores on disk.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use qbo_gateway::{
    auth::{AuthManager, Credential, CredentialStore, EnvFileStore, SqliteStore},
    error::ApiError,
    http_client::QboHttpClient,
    query::QueryExecutor,
    reports::{DirArchive, ReportFetcher},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

const REALM: &str = "4620816365320749920";

fn bootstrap_credential() -> Credential {
    Credential::new("access-1", "refresh-1", "client-id", "client-secret", REALM)
}

fn write_env_file(path: &Path) {
    std::fs::write(
        path,
        "CLIENT_ID=client-id\nCLIENT_SECRET=client-secret\nACCESS_TOKEN=access-1\nREFRESH_TOKEN=refresh-1\nREALM_ID=4620816365320749920\n",
    )
    .unwrap();
}

fn build_clients(
    server: &ServerGuard,
    store: Arc<dyn CredentialStore>,
) -> (Arc<AuthManager>, Arc<QboHttpClient>) {
    let auth_manager = Arc::new(
        AuthManager::new(
            bootstrap_credential(),
            store,
            format!("{}/oauth2/v1/tokens/bearer", server.url()),
            5,
            300,
        )
        .expect("Failed to create auth manager"),
    );
    let http_client = Arc::new(
        QboHttpClient::new(
            auth_manager.clone(),
            format!("{}/v3/company", server.url()),
            "65",
            5,
            5,
        )
        .expect("Failed to create HTTP client"),
    );
    (auth_manager, http_client)
}

fn report_path(name: &str) -> String {
    format!("/v3/company/{}/reports/{}", REALM, name)
}

fn date_total_report() -> Value {
    json!({
        "Header": {"ReportName": "ProfitAndLoss"},
        "Columns": {"Column": [{"ColTitle": "Date"}, {"ColTitle": "Total"}]},
        "Rows": {"Row": [
            {"ColData": [{"value": "2025-01-01"}, {"value": "100"}]},
            {"Rows": {"Row": [{"ColData": [{"value": "2025-01-02"}]}]}}
        ]}
    })
}

// ==================================================================================================
// Report pipeline
// ==================================================================================================

#[tokio::test]
async fn test_expired_token_refreshes_persists_and_normalizes() {
    let mut server = Server::new_async().await;
    let _rejected = server
        .mock("GET", report_path("ProfitAndLoss").as_str())
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let _accepted = server
        .mock("GET", report_path("ProfitAndLoss").as_str())
        .match_query(Matcher::UrlEncoded("minorversion".into(), "65".into()))
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(date_total_report().to_string())
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("POST", "/oauth2/v1/tokens/bearer")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"access-2","refresh_token":"refresh-2","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    write_env_file(&env_path);

    let (auth_manager, http_client) =
        build_clients(&server, Arc::new(EnvFileStore::new(&env_path)));
    let archive = DirArchive::new(dir.path().join("raw_reports"));
    let fetcher = ReportFetcher::new(http_client)
        .with_archive(Arc::new(DirArchive::new(dir.path().join("raw_reports"))));

    let table = fetcher.fetch_table("ProfitAndLoss").await.unwrap();

    token.assert_async().await;
    assert_eq!(auth_manager.refresh_count(), 1);
    assert_eq!(table.headers, vec!["Date", "Total"]);
    assert_eq!(
        table.rows,
        vec![
            vec![json!("2025-01-01"), json!("100")],
            vec![json!("2025-01-02"), Value::Null],
        ]
    );

    let env = std::fs::read_to_string(&env_path).unwrap();
    assert!(env.contains("ACCESS_TOKEN=access-2\n"));
    assert!(env.contains("REFRESH_TOKEN=refresh-2\n"));
    assert!(env.contains("REALM_ID=4620816365320749920\n"));

    let raw: Value = serde_json::from_str(
        &std::fs::read_to_string(archive.path_for("ProfitAndLoss")).unwrap(),
    )
    .unwrap();
    assert_eq!(raw, date_total_report());
}

#[tokio::test]
async fn test_refresh_without_refresh_token_keeps_prior_on_disk() {
    let mut server = Server::new_async().await;
    let _rejected = server
        .mock("GET", report_path("BalanceSheet").as_str())
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .create_async()
        .await;
    let _accepted = server
        .mock("GET", report_path("BalanceSheet").as_str())
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(r#"{"Columns":{"Column":[]},"Rows":{}}"#)
        .create_async()
        .await;
    let _token = server
        .mock("POST", "/oauth2/v1/tokens/bearer")
        .with_status(200)
        .with_body(r#"{"access_token":"access-2"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    write_env_file(&env_path);

    let (auth_manager, http_client) =
        build_clients(&server, Arc::new(EnvFileStore::new(&env_path)));
    let table = ReportFetcher::new(http_client)
        .fetch_table("BalanceSheet")
        .await
        .unwrap();

    assert!(!table.has_columns());
    assert!(table.rows.is_empty());
    assert_eq!(auth_manager.current_credential().await.refresh_token, "refresh-1");

    let env = std::fs::read_to_string(&env_path).unwrap();
    assert!(env.contains("ACCESS_TOKEN=access-2\n"));
    assert!(env.contains("REFRESH_TOKEN=refresh-1\n"));
}

#[tokio::test]
async fn test_persisted_tokens_survive_restart() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("POST", "/oauth2/v1/tokens/bearer")
        .with_status(200)
        .with_body(r#"{"access_token":"access-9","refresh_token":"refresh-9","expires_in":3600}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tokens.sqlite3");

    let (auth_manager, _) = build_clients(&server, Arc::new(SqliteStore::new(&db_path)));
    auth_manager.refresh().await.unwrap();
    drop(auth_manager);

    // A new process starts from the same bootstrap values but the store wins
    let (restarted, _) = build_clients(&server, Arc::new(SqliteStore::new(&db_path)));
    let creds = restarted.current_credential().await;
    assert_eq!(creds.access_token, "access-9");
    assert_eq!(creds.refresh_token, "refresh-9");
    assert!(creds.expires_at.is_some());
    assert_eq!(restarted.refresh_count(), 0);
}

#[tokio::test]
async fn test_concurrent_rejections_share_one_refresh() {
    let mut server = Server::new_async().await;
    let _rejected = server
        .mock("GET", report_path("ProfitAndLoss").as_str())
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .create_async()
        .await;
    let _accepted = server
        .mock("GET", report_path("ProfitAndLoss").as_str())
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(date_total_report().to_string())
        .create_async()
        .await;
    let token = server
        .mock("POST", "/oauth2/v1/tokens/bearer")
        .with_status(200)
        .with_body(r#"{"access_token":"access-2","refresh_token":"refresh-2"}"#)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (auth_manager, http_client) = build_clients(
        &server,
        Arc::new(EnvFileStore::new(dir.path().join("absent.env"))),
    );
    let fetcher = ReportFetcher::new(http_client);

    let (a, b) = tokio::join!(
        fetcher.fetch_table("ProfitAndLoss"),
        fetcher.fetch_table("ProfitAndLoss")
    );

    assert_eq!(a.unwrap().rows.len(), 2);
    assert_eq!(b.unwrap().rows.len(), 2);
    token.assert_async().await;
    assert_eq!(auth_manager.refresh_count(), 1);
}

#[tokio::test]
async fn test_provider_error_carries_status() {
    let mut server = Server::new_async().await;
    let _report = server
        .mock("GET", report_path("NotAReport").as_str())
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"Fault":{"Error":[{"Message":"Unsupported Operation"}]}}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (_, http_client) = build_clients(
        &server,
        Arc::new(EnvFileStore::new(dir.path().join("absent.env"))),
    );

    let err = ReportFetcher::new(http_client)
        .fetch("NotAReport")
        .await
        .unwrap_err();
    match err {
        ApiError::ProviderError {
            status,
            target,
            message,
        } => {
            assert_eq!(status, 400);
            assert_eq!(target, "NotAReport");
            assert!(message.contains("Unsupported Operation"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// ==================================================================================================
// Query pipeline
// ==================================================================================================

#[tokio::test]
async fn test_query_returns_flat_records() {
    let mut server = Server::new_async().await;
    let statement = "SELECT * FROM Invoice WHERE TxnDate >= '2025-04-01' ORDERBY TxnDate";
    let _query = server
        .mock("GET", format!("/v3/company/{}/query", REALM).as_str())
        .match_query(Matcher::UrlEncoded("query".into(), statement.into()))
        .match_header("authorization", "Bearer access-1")
        .with_status(200)
        .with_body(
            json!({
                "QueryResponse": {
                    "Invoice": [
                        {"Id": "130", "TxnDate": "2025-04-02", "TotalAmt": 362.07},
                        {"Id": "131", "TxnDate": "2025-04-05", "TotalAmt": 80.0}
                    ],
                    "startPosition": 1,
                    "maxResults": 2
                },
                "time": "2025-05-01T10:00:00.000-07:00"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (_, http_client) = build_clients(
        &server,
        Arc::new(SqliteStore::new(dir.path().join("tokens.sqlite3"))),
    );

    let records = QueryExecutor::new(http_client).query(statement).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["TxnDate"], "2025-04-02");
    assert_eq!(records[1]["Id"], "131");
}
