// library system

use lsys::{config::Config, error::AppResult};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
	// a missing .env is fine; the environment may already be set
	let _ = dotenvy::dotenv();

	fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let seed_demo = std::env::args().any(|arg| arg == "--seed");
	let config = Config::load()?;

	lsys::start_server(config, seed_demo).await
}
