use std::{str::FromStr, time::Duration};

use sqlx::{
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
	Executor, Pool, Sqlite,
};

use crate::error::AppResult;

pub type DB = Pool<Sqlite>;

pub const TABLE_SCHEMA: &str = r#"

CREATE TABLE IF NOT EXISTS accounts (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	name TEXT NOT NULL,
	email TEXT NOT NULL UNIQUE,
	pass_hash TEXT NOT NULL,
	role TEXT NOT NULL DEFAULT 'MEMBER',
	created_at TEXT NOT NULL,
	CHECK(role IN ('ADMIN', 'MEMBER'))
);

CREATE TABLE IF NOT EXISTS sessions (
	token TEXT NOT NULL PRIMARY KEY,
	user_id INTEGER NOT NULL,
	created_at TEXT NOT NULL,
	FOREIGN KEY(user_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS books (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	title TEXT NOT NULL,
	author TEXT NOT NULL,
	genre TEXT DEFAULT NULL,
	isbn TEXT DEFAULT NULL UNIQUE,
	description TEXT DEFAULT NULL,
	published_year INTEGER DEFAULT NULL,
	checked_out BOOLEAN NOT NULL DEFAULT false,
	checked_out_at TEXT DEFAULT NULL,
	checked_out_by_id INTEGER DEFAULT NULL,
	created_at TEXT NOT NULL,
	updated_at TEXT NOT NULL,
	CHECK((checked_out_at IS NULL) == (checked_out_by_id IS NULL)),
	CHECK((checked_out_at IS NULL) == (checked_out == false)),
	FOREIGN KEY(checked_out_by_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS borrow_records (
	id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
	book_id INTEGER NOT NULL,
	user_id INTEGER NOT NULL,
	borrowed_at TEXT NOT NULL,
	returned_at TEXT DEFAULT NULL,
	FOREIGN KEY(user_id) REFERENCES accounts(id),
	FOREIGN KEY(book_id) REFERENCES books(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS borrow_records_one_open
	ON borrow_records(book_id) WHERE returned_at IS NULL;

CREATE INDEX IF NOT EXISTS borrow_records_user
	ON borrow_records(user_id, returned_at);

"#;

/// Opens (creating if needed) the database at `url` and applies the schema.
pub async fn open(url: &str, max_connections: u32) -> AppResult<DB> {
	let options = SqliteConnectOptions::from_str(url)?
		.create_if_missing(true)
		.foreign_keys(true)
		.journal_mode(SqliteJournalMode::Wal)
		.busy_timeout(Duration::from_secs(5));

	let pool = SqlitePoolOptions::new()
		.max_connections(max_connections)
		.acquire_timeout(Duration::from_secs(3))
		.connect_with(options)
		.await?;

	schema(&pool).await?;
	Ok(pool)
}

/// Private in-memory database; a single pinned connection keeps it alive.
pub async fn open_in_memory() -> AppResult<DB> {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.min_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await?;

	schema(&pool).await?;
	Ok(pool)
}

async fn schema(pool: &DB) -> AppResult<()> {
	pool.execute(TABLE_SCHEMA).await?;
	Ok(())
}
