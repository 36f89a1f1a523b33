use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_BASE_URL: &str = "https://sandbox-quickbooks.api.intuit.com/v3/company";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";

/// QuickBooks Online report puller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Intuit app client id
    #[arg(long, env = "CLIENT_ID")]
    pub client_id: Option<String>,

    /// Intuit app client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Bootstrap access token
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Bootstrap refresh token
    #[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Company (realm) id
    #[arg(short = 'r', long, env = "REALM_ID")]
    pub realm_id: Option<String>,

    /// Company API base URL (sandbox or production)
    #[arg(long, env = "QBO_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// OAuth token endpoint
    #[arg(long, env = "QBO_TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
    pub token_url: String,

    /// API minor version
    #[arg(long, env = "MINOR_VERSION", default_value = "65")]
    pub minor_version: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Credential store kind (env, sqlite)
    #[arg(long, env = "CREDENTIAL_STORE", default_value = "env")]
    pub credential_store: String,

    /// Credential store file
    #[arg(long, env = "CREDENTIAL_FILE", default_value = ".env")]
    pub credential_file: String,

    /// Directory for raw report copies
    #[arg(long, env = "RAW_REPORTS_DIR", default_value = "raw_reports")]
    pub raw_reports_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Fetch and normalize reports
    Pull {
        /// Report names
        #[arg(default_values_t = vec!["ProfitAndLoss".to_string(), "BalanceSheet".to_string()])]
        reports: Vec<String>,

        /// Rows to print per report
        #[arg(long, default_value = "5")]
        rows: usize,
    },

    /// Run a query statement
    Query {
        /// Statement, e.g. "SELECT * FROM Invoice"
        statement: String,
    },

    /// Exchange an authorization code for the first token pair
    Exchange {
        #[arg(long)]
        code: String,

        #[arg(long)]
        redirect_uri: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Intuit app and company
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: String,

    // Endpoints
    pub base_url: String,
    pub token_url: String,
    pub minor_version: String,

    // Timeouts
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub token_refresh_threshold: u64,

    // Storage
    pub credential_store: StoreKind,
    pub credential_file: PathBuf,
    pub raw_reports_dir: PathBuf,

    pub log_level: String,
    pub command: Command,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoreKind {
    EnvFile,
    Sqlite,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let command = args.command.clone().unwrap_or(Command::Pull {
            reports: vec!["ProfitAndLoss".to_string(), "BalanceSheet".to_string()],
            rows: 5,
        });

        Ok(Config {
            client_id: args.client_id.unwrap_or_default(),
            client_secret: args.client_secret.unwrap_or_default(),
            access_token: args.access_token.unwrap_or_default(),
            refresh_token: args.refresh_token.unwrap_or_default(),
            realm_id: args.realm_id.unwrap_or_default(),

            base_url: args.base_url,
            token_url: args.token_url,
            minor_version: args.minor_version,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            token_refresh_threshold: std::env::var("TOKEN_REFRESH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            credential_store: parse_store_kind(&args.credential_store)?,
            credential_file: expand_tilde(&args.credential_file),
            raw_reports_dir: expand_tilde(&args.raw_reports_dir),

            log_level: args.log_level,
            command,
        })
    }

    /// Validate configuration, naming every missing required value at once
    pub fn validate(&self) -> Result<()> {
        let mut required = vec![
            ("CLIENT_ID", &self.client_id),
            ("CLIENT_SECRET", &self.client_secret),
            ("REALM_ID", &self.realm_id),
        ];
        // The bootstrap exchange is what produces the tokens
        if !matches!(self.command, Command::Exchange { .. }) {
            required.push(("ACCESS_TOKEN", &self.access_token));
            required.push(("REFRESH_TOKEN", &self.refresh_token));
        }

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            anyhow::bail!("Missing required env vars: {}", missing.join(", "));
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_TIMEOUT must be greater than zero");
        }

        Ok(())
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse credential store kind from string
fn parse_store_kind(s: &str) -> Result<StoreKind> {
    match s.to_lowercase().as_str() {
        "env" | "dotenv" => Ok(StoreKind::EnvFile),
        "sqlite" => Ok(StoreKind::Sqlite),
        other => anyhow::bail!("Unknown CREDENTIAL_STORE '{}' (expected env or sqlite)", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["qbo-gateway"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    fn full_args() -> Vec<&'static str> {
        vec![
            "--client-id",
            "cid",
            "--client-secret",
            "secret",
            "--access-token",
            "at",
            "--refresh-token",
            "rt",
            "--realm-id",
            "4620816365320749920",
        ]
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_parse_store_kind() {
        assert_eq!(parse_store_kind("env").unwrap(), StoreKind::EnvFile);
        assert_eq!(parse_store_kind("SQLITE").unwrap(), StoreKind::Sqlite);
        assert!(parse_store_kind("redis").is_err());
    }

    #[test]
    fn test_default_command_is_pull() {
        let config = Config::from_args(parse(&full_args())).unwrap();
        assert_eq!(
            config.command,
            Command::Pull {
                reports: vec!["ProfitAndLoss".to_string(), "BalanceSheet".to_string()],
                rows: 5,
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_pull_with_explicit_reports() {
        let mut args = full_args();
        args.extend_from_slice(&["pull", "CashFlow", "--rows", "10"]);
        let config = Config::from_args(parse(&args)).unwrap();
        assert_eq!(
            config.command,
            Command::Pull {
                reports: vec!["CashFlow".to_string()],
                rows: 10,
            }
        );
    }

    #[test]
    fn test_query_command() {
        let mut args = full_args();
        args.extend_from_slice(&["query", "SELECT * FROM Invoice"]);
        let config = Config::from_args(parse(&args)).unwrap();
        assert_eq!(
            config.command,
            Command::Query {
                statement: "SELECT * FROM Invoice".to_string()
            }
        );
    }

    #[test]
    fn test_validate_reports_all_missing() {
        let mut config = Config::from_args(parse(&full_args())).unwrap();
        config.client_id.clear();
        config.refresh_token.clear();

        let err = config.validate().unwrap_err().to_string();
        assert_eq!(err, "Missing required env vars: CLIENT_ID, REFRESH_TOKEN");
    }

    #[test]
    fn test_exchange_does_not_require_tokens() {
        let mut config = Config::from_args(parse(&[
            "--client-id",
            "cid",
            "--client-secret",
            "secret",
            "--realm-id",
            "1",
            "exchange",
            "--code",
            "abc",
            "--redirect-uri",
            "http://localhost:8000/callback",
        ]))
        .unwrap();
        config.access_token.clear();
        config.refresh_token.clear();
        config.validate().unwrap();
    }
}
