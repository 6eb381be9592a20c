//! Multi-user library catalog.
//!
//! Members browse and search the catalog and borrow or return books;
//! admins manage catalog entries. The interesting part is the lending core:
//!
//! - **`catalog`**: books plus the append-only borrow ledger, with one atomic
//!   `transition` per checkout/checkin.
//! - **`lending`**: the two-state lending rules (available / borrowed).
//! - **`search`** and **`recommend`**: token scoring and ranked picks.
//! - **`auth`**: accounts, cookie sessions and the admin allow-list; the rest
//!   of the crate only consumes the resulting `Principal`.

use tokio::{
	net::TcpListener,
	signal::{self, ctrl_c},
};
use tracing::info;

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lending;
pub mod recommend;
pub mod routes;
pub mod search;
pub mod seed;
pub mod sql;
pub mod state;
pub mod types;

use auth::AdminPolicy;
use config::Config;
use error::AppResult;
use state::AppState;

/// Opens the store, serves HTTP until a shutdown signal, then closes the store.
pub async fn start_server(config: Config, seed_demo: bool) -> AppResult<()> {
	info!("Opening database {}", config.database_url);
	let db = sql::open(&config.database_url, config.max_connections).await?;
	let state = AppState::new(db, AdminPolicy::new(&config.admin_emails));

	if seed_demo {
		seed::seed(&state).await?;
	}

	let app = routes::router(state.clone());

	let listener = TcpListener::bind(&config.bind_addr).await?;
	info!("Server running on {}", config.bind_addr);

	let served = axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await;

	info!("Server shutting down...");
	state.catalog.close().await;
	Ok(served?)
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = ctrl_c().await {
			tracing::error!("Failed to install Ctrl+C handler: {e}");
			std::future::pending::<()>().await;
		}
		info!("Received Ctrl+C, shutting down");
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut sig) => {
				sig.recv().await;
				info!("Received terminate signal, shutting down");
			},
			Err(e) => {
				tracing::error!("Failed to install signal handler: {e}");
				std::future::pending::<()>().await;
			},
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
