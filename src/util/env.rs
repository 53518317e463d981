//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Keys checked for a database URL, first set wins.
pub const DB_URL_KEYS: [&str; 4] = [
    "SUPABASE_DB_SESSION_URL",
    "SUPABASE_DB_URL",
    "DATABASE_URL",
    "DB_URL",
];

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => parse_flag(&raw),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_ascii_lowercase();
    matches!(v.as_str(), "1" | "true" | "on" | "yes")
}

/// Comma separated list; None when unset so callers can keep their defaults.
pub fn env_list(key: &str) -> Option<Vec<String>> {
    env_opt(key).map(|raw| split_list(&raw))
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// First database URL found in [`DB_URL_KEYS`].
pub fn db_url() -> anyhow::Result<String> {
    DB_URL_KEYS
        .iter()
        .find_map(|k| env_opt(k))
        .ok_or_else(|| anyhow::anyhow!("no database URL env vars set ({})", DB_URL_KEYS.join(", ")))
}

/// Same as `db_url()` but swaps the Supabase transaction pooler for the session pooler
/// unless DISABLE_SESSION_SWAP is set.
pub fn db_url_prefer_session() -> anyhow::Result<String> {
    let raw = db_url()?;
    if env_flag("DISABLE_SESSION_SWAP", false) {
        Ok(raw)
    } else {
        Ok(prefer_session_mode(&raw))
    }
}

/// If the URL looks like Supabase's transaction pooler (port 6543),
/// prefer the session pooler (5432) to avoid prepare/timeout issues.
pub fn prefer_session_mode(url: &str) -> String {
    if url.contains("pooler.supabase.com:6543") {
        tracing::warn!("detected Supabase transaction pooler (:6543); switching to :5432 (session)");
        url.replace("pooler.supabase.com:6543", "pooler.supabase.com:5432")
    } else {
        url.to_string()
    }
}

pub fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD")
        || k.contains("SECRET")
        || k.contains("KEY")
        || k.contains("TOKEN")
        || k.contains("COOKIE")
    {
        return "***".to_string();
    }

    let val_trim = val.trim();

    // Postgres DSNs are redacted whatever the key is called.
    if let Ok(mut u) = url::Url::parse(val_trim) {
        let scheme = u.scheme().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            return u.to_string();
        }
    }

    if (k.contains("URL") || k.contains("DSN"))
        && (val_trim.starts_with("postgres://") || val_trim.starts_with("postgresql://"))
    {
        return "postgres://***".to_string();
    }

    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|&k| {
            let v = env_opt(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(scope = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}
