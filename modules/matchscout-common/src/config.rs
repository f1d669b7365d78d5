use std::env;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Web server
    pub api_host: String,
    pub api_port: u16,

    // Scheduling
    /// Every Nth dispatch is allowed to reopen a completed account for a re-crawl.
    pub rerun_interval: i64,
    /// Rows kept per hero in the top-performer cache.
    pub top_performers_cap: i64,

    // Reclaim sweep
    pub reclaim_interval_secs: u64,
    /// Assignments older than this are treated as abandoned.
    pub assignment_max_age_secs: u64,

    /// Optional account seeded at depth 0 on startup.
    pub seed_account_id: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if a value fails to parse.
    pub fn from_env() -> Self {
        Self {
            database_url: database_url_from_env(),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
            rerun_interval: parsed_env("RERUN_INTERVAL", 50),
            top_performers_cap: parsed_env("TOP_PERFORMERS_CAP", 100),
            reclaim_interval_secs: parsed_env("RECLAIM_INTERVAL_SECS", 60),
            assignment_max_age_secs: parsed_env("ASSIGNMENT_MAX_AGE_SECS", 600),
            seed_account_id: env::var("SEED_ACCOUNT_ID")
                .ok()
                .map(|v| v.parse().expect("SEED_ACCOUNT_ID must be a number")),
        }
    }
}

/// `DATABASE_URL` wins; otherwise the URL is assembled from `POSTGRES_*` parts.
fn database_url_from_env() -> String {
    if let Ok(url) = env::var("DATABASE_URL") {
        return url;
    }
    let user = env::var("POSTGRES_USER").unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD").unwrap_or_else(|_| "postgres".to_string());
    let host = env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
    let database = env::var("POSTGRES_DB").unwrap_or_else(|_| "matchscout".to_string());
    format!("postgresql://{user}:{password}@{host}:{port}/{database}")
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
