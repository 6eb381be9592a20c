use crate::{
	auth::{Accounts, AdminPolicy},
	catalog::CatalogStore,
	sql::DB,
};

/// Handles shared by every request. Cloning is cheap: both halves wrap the
/// same connection pool.
#[derive(Clone)]
pub struct AppState {
	pub catalog: CatalogStore,
	pub accounts: Accounts,
}

impl AppState {
	pub fn new(db: DB, policy: AdminPolicy) -> Self {
		Self {
			catalog: CatalogStore::new(db.clone()),
			accounts: Accounts::new(db, policy),
		}
	}
}
