use std::{env, fmt::Display, str::FromStr};

use tracing::info;

use crate::error::{AppError, AppResult};

pub struct Config {
	pub database_url: String,
	pub bind_addr: String,
	pub max_connections: u32,
	pub admin_emails: Vec<String>,
}

impl Config {
	/// Reads the process environment (after `.env`, if present).
	pub fn load() -> AppResult<Self> {
		Self::from_lookup(|key| env::var(key).ok())
	}

	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
		Ok(Self {
			database_url: try_load(&lookup, "DATABASE_URL", "sqlite://lsys.db")?,
			bind_addr: try_load(&lookup, "BIND_ADDR", "0.0.0.0:8080")?,
			max_connections: try_load(&lookup, "MAX_CONNECTIONS", "5")?,
			admin_emails: parse_email_list(&lookup("ADMIN_EMAILS").unwrap_or_default()),
		})
	}
}

fn try_load<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> AppResult<T>
where
	T::Err: Display,
{
	let raw = lookup(key).unwrap_or_else(|| {
		info!("{key} not set, using default: {default}");
		default.to_string()
	});
	raw.parse()
		.map_err(|e| AppError::Config(format!("invalid {key} value {raw:?}: {e}")))
}

/// Comma separated, trimmed, lower-cased; blanks dropped.
pub fn parse_email_list(raw: &str) -> Vec<String> {
	raw.split(',')
		.map(|x| x.trim().to_lowercase())
		.filter(|x| !x.is_empty())
		.collect()
}
