//! Server configuration. Each setting resolves as command-line flag, then
//! `GYMAUTH_*` environment variable, then built-in default.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use base64::Engine;

use crate::identity::token::{DEFAULT_TOKEN_TTL_SECS, MIN_SECRET_LEN};

pub const DEFAULT_HTTP_PORT: u16 = 7878;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

pub const ENV_HTTP_PORT: &str = "GYMAUTH_HTTP_PORT";
pub const ENV_DATA_DIR: &str = "GYMAUTH_DATA_DIR";
pub const ENV_TOKEN_SECRET: &str = "GYMAUTH_TOKEN_SECRET";
pub const ENV_TOKEN_TTL: &str = "GYMAUTH_TOKEN_TTL_SECS";
pub const ENV_SWEEP_INTERVAL: &str = "GYMAUTH_SWEEP_INTERVAL_SECS";
pub const ENV_ADMIN_USERNAME: &str = "GYMAUTH_ADMIN_USERNAME";
pub const ENV_ADMIN_PASSWORD: &str = "GYMAUTH_ADMIN_PASSWORD";

pub const USAGE: &str = "gymauth server\n\nUSAGE:\n  gymauth_server [OPTIONS]\n\nOPTIONS:\n  --http-port N           HTTP port (env: GYMAUTH_HTTP_PORT, default 7878)\n  --data-dir PATH         Directory for principals and revocations (env: GYMAUTH_DATA_DIR, default data)\n  --token-secret B64      Base64 signing secret, at least 32 bytes decoded (env: GYMAUTH_TOKEN_SECRET; random if unset)\n  --token-ttl SECS        Token lifetime (env: GYMAUTH_TOKEN_TTL_SECS, default 3600)\n  --sweep-interval SECS   Revocation sweep period (env: GYMAUTH_SWEEP_INTERVAL_SECS, default 60)\n  --admin-user NAME       Admin seeded into an empty store (env: GYMAUTH_ADMIN_USERNAME, default admin)\n  --admin-password PW     Password for the seeded admin (env: GYMAUTH_ADMIN_PASSWORD, default admin)\n  -h, --help              Show this help\n";

#[derive(Clone)]
pub struct ServerConfig {
    pub http_port: u16,
    pub data_dir: PathBuf,
    /// Decoded signing secret. `None` means one is generated at startup.
    pub token_secret: Option<Vec<u8>>,
    pub token_ttl_secs: i64,
    pub sweep_interval_secs: u64,
    pub admin_username: String,
    pub admin_password: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_port", &self.http_port)
            .field("data_dir", &self.data_dir)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<set>"))
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("admin_username", &self.admin_username)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            token_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            admin_username: DEFAULT_ADMIN_USERNAME.to_string(),
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> { Self::from_env_and_args(&[]) }

    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve against `args` and an arbitrary variable lookup.
    pub fn resolve(args: &[String], env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let pick = |flag: &str, var: &str| parse_string_arg(args, flag).or_else(|| env(var));

        let http_port = match pick("--http-port", ENV_HTTP_PORT) {
            Some(v) => v.trim().parse::<u16>().with_context(|| format!("invalid http port '{}'", v))?,
            None => d.http_port,
        };
        let data_dir = pick("--data-dir", ENV_DATA_DIR).map(PathBuf::from).unwrap_or(d.data_dir);
        let token_secret = match pick("--token-secret", ENV_TOKEN_SECRET) {
            Some(v) => Some(decode_secret(&v)?),
            None => None,
        };
        let token_ttl_secs = match pick("--token-ttl", ENV_TOKEN_TTL) {
            Some(v) => parse_positive(&v, "token ttl")? as i64,
            None => d.token_ttl_secs,
        };
        let sweep_interval_secs = match pick("--sweep-interval", ENV_SWEEP_INTERVAL) {
            Some(v) => parse_positive(&v, "sweep interval")?,
            None => d.sweep_interval_secs,
        };
        let admin_username = pick("--admin-user", ENV_ADMIN_USERNAME).unwrap_or(d.admin_username);
        let admin_password = pick("--admin-password", ENV_ADMIN_PASSWORD).unwrap_or(d.admin_password);

        Ok(Self { http_port, data_dir, token_secret, token_ttl_secs, sweep_interval_secs, admin_username, admin_password })
    }
}

pub fn has_flag(args: &[String], flag: &str) -> bool { args.iter().any(|a| a == flag) }

/// Value following `flag`, if both are present.
pub fn parse_string_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn parse_positive(v: &str, what: &str) -> Result<u64> {
    let n = v.trim().parse::<u64>().with_context(|| format!("invalid {} '{}'", what, v))?;
    if n == 0 || n > i64::MAX as u64 { return Err(anyhow!("{} must be a positive number of seconds", what)); }
    Ok(n)
}

fn decode_secret(v: &str) -> Result<Vec<u8>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(v.trim())
        .context("token secret is not valid base64")?;
    if bytes.len() < MIN_SECRET_LEN {
        return Err(anyhow!("token secret must decode to at least {} bytes (got {})", MIN_SECRET_LEN, bytes.len()));
    }
    Ok(bytes)
}
