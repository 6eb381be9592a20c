//! Authoritative storage for books and the lending ledger.
//!
//! Every mutation of a book's lending columns and of `borrow_records` goes
//! through [`CatalogStore::transition`], which runs one transaction per book:
//! a conditional `UPDATE` on the book row claims it, and the ledger write
//! commits with it or not at all.

use chrono::Utc;
use garde::Validate;
use sqlx::SqliteConnection;

use crate::{
	error::{AppError, AppResult},
	lending,
	sql::DB,
	types::{Bid, Book, BookForm, BookQuery, BorrowRecord, LendingOp, Principal, Uid},
};

const SELECT_BOOK: &str = r#"
SELECT
	b.id, b.title, b.author, b.genre, b.isbn, b.description, b.published_year,
	b.checked_out, b.checked_out_at, b.checked_out_by_id,
	a.name AS borrower_name, a.email AS borrower_email,
	b.created_at, b.updated_at
FROM
	books b
	LEFT JOIN accounts a ON a.id = b.checked_out_by_id
"#;

const SELECT_RECORD: &str = r#"
SELECT id, book_id, user_id, borrowed_at, returned_at FROM borrow_records
"#;

const DUPLICATE_ISBN: &str = "a book with this ISBN already exists";

/// Ordering of [`CatalogStore::list_books`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
	/// Most recently created first.
	#[default]
	Newest,
	/// Available books first, then by title. Used as ranking input.
	AvailabilityThenTitle,
}

impl ListOrder {
	fn clause(self) -> &'static str {
		match self {
			ListOrder::Newest => "ORDER BY b.created_at DESC, b.id DESC",
			ListOrder::AvailabilityThenTitle => "ORDER BY b.checked_out ASC, b.title ASC, b.id ASC",
		}
	}
}

#[derive(Clone)]
pub struct CatalogStore {
	db: DB,
}

impl CatalogStore {
	pub fn new(db: DB) -> Self {
		Self { db }
	}

	#[cfg(test)]
	pub(crate) fn db(&self) -> &DB {
		&self.db
	}

	pub async fn close(&self) {
		self.db.close().await;
	}

	pub async fn find_book(&self, id: Bid) -> AppResult<Book> {
		let mut conn = self.db.acquire().await?;
		fetch_book(&mut conn, id).await?.ok_or_else(|| not_found(id))
	}

	/// The single unreturned ledger entry for `book_id`, if any.
	pub async fn find_open_borrow_record(&self, book_id: Bid) -> AppResult<Option<BorrowRecord>> {
		let mut open = sqlx::query_as::<_, BorrowRecord>(&format!(
			"{SELECT_RECORD} WHERE book_id = ? AND returned_at IS NULL"
		))
		.bind(book_id)
		.fetch_all(&self.db)
		.await?;

		if open.len() > 1 {
			tracing::error!(book_id, open = open.len(), "multiple open borrow records");
			return Err(AppError::InternalInconsistency(format!(
				"book {book_id} has {} open borrow records",
				open.len()
			)));
		}
		Ok(open.pop())
	}

	/// Full ledger of a book, newest first.
	pub async fn history(&self, book_id: Bid) -> AppResult<Vec<BorrowRecord>> {
		self.find_book(book_id).await?;
		let records = sqlx::query_as::<_, BorrowRecord>(&format!(
			"{SELECT_RECORD} WHERE book_id = ? ORDER BY borrowed_at DESC, id DESC"
		))
		.bind(book_id)
		.fetch_all(&self.db)
		.await?;
		Ok(records)
	}

	/// Open ledger entries held by `user_id`, oldest first.
	pub async fn open_records_for_user(&self, user_id: Uid) -> AppResult<Vec<BorrowRecord>> {
		let records = sqlx::query_as::<_, BorrowRecord>(&format!(
			"{SELECT_RECORD} WHERE user_id = ? AND returned_at IS NULL ORDER BY borrowed_at ASC, id ASC"
		))
		.bind(user_id)
		.fetch_all(&self.db)
		.await?;
		Ok(records)
	}

	pub async fn books_held_by(&self, user_id: Uid) -> AppResult<Vec<Book>> {
		let rows = sqlx::query_as::<_, BookQuery>(&format!(
			"{SELECT_BOOK} WHERE b.checked_out_by_id = ? ORDER BY b.checked_out_at ASC, b.id ASC"
		))
		.bind(user_id)
		.fetch_all(&self.db)
		.await?;
		rows.into_iter().map(Book::from_query).collect()
	}

	/// Lists books, optionally keeping only those where `filter` is a
	/// case-insensitive substring of the title, author, genre, ISBN or
	/// description.
	pub async fn list_books(&self, filter: Option<&str>, order: ListOrder) -> AppResult<Vec<Book>> {
		let filter = filter.map(str::trim).filter(|f| !f.is_empty());

		let rows = match filter {
			None => {
				sqlx::query_as::<_, BookQuery>(&format!("{SELECT_BOOK} {}", order.clause()))
					.fetch_all(&self.db)
					.await?
			},
			Some(needle) => {
				let pattern = like_pattern(needle);
				sqlx::query_as::<_, BookQuery>(&format!(
					r#"{SELECT_BOOK}
WHERE
	b.title LIKE ? ESCAPE '\'
	OR b.author LIKE ? ESCAPE '\'
	OR b.genre LIKE ? ESCAPE '\'
	OR b.isbn LIKE ? ESCAPE '\'
	OR b.description LIKE ? ESCAPE '\'
{}"#,
					order.clause()
				))
				.bind(&pattern)
				.bind(&pattern)
				.bind(&pattern)
				.bind(&pattern)
				.bind(&pattern)
				.fetch_all(&self.db)
				.await?
			},
		};

		rows.into_iter().map(Book::from_query).collect()
	}

	pub async fn create_book(&self, form: BookForm) -> AppResult<Book> {
		form.validate()?;
		let form = form.normalized();
		let now = Utc::now();

		let inserted = sqlx::query(
			r#"
INSERT INTO books
	(title, author, genre, isbn, description, published_year, created_at, updated_at)
VALUES
	(?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&form.title)
		.bind(&form.author)
		.bind(&form.genre)
		.bind(&form.isbn)
		.bind(&form.description)
		.bind(form.published_year)
		.bind(now)
		.bind(now)
		.execute(&self.db)
		.await
		.map_err(|e| AppError::from_db(e, DUPLICATE_ISBN))?;

		let id = inserted.last_insert_rowid();
		tracing::info!(book_id = id, title = %form.title, "book created");
		self.find_book(id).await
	}

	/// Replaces the descriptive fields of a book. Lending state is untouched.
	pub async fn update_book(&self, id: Bid, form: BookForm) -> AppResult<Book> {
		form.validate()?;
		let form = form.normalized();

		let updated = sqlx::query(
			r#"
UPDATE books SET
	title = ?, author = ?, genre = ?, isbn = ?, description = ?, published_year = ?, updated_at = ?
WHERE
	id = ?
			"#,
		)
		.bind(&form.title)
		.bind(&form.author)
		.bind(&form.genre)
		.bind(&form.isbn)
		.bind(&form.description)
		.bind(form.published_year)
		.bind(Utc::now())
		.bind(id)
		.execute(&self.db)
		.await
		.map_err(|e| AppError::from_db(e, DUPLICATE_ISBN))?;

		if updated.rows_affected() == 0 {
			return Err(not_found(id));
		}
		tracing::info!(book_id = id, "book updated");
		self.find_book(id).await
	}

	/// Removes an available book together with its (closed) ledger.
	/// A borrowed book is refused so its open record never dangles.
	pub async fn delete_book(&self, id: Bid) -> AppResult<()> {
		let mut tx = self.db.begin().await?;

		let deleted = sqlx::query("DELETE FROM books WHERE id = ? AND checked_out = false")
			.bind(id)
			.execute(&mut *tx)
			.await?;

		if deleted.rows_affected() == 0 {
			let err = match fetch_book(&mut tx, id).await? {
				None => not_found(id),
				Some(_) => AppError::Conflict("book is currently borrowed".to_string()),
			};
			tx.rollback().await?;
			return Err(err);
		}

		tx.commit().await?;
		tracing::info!(book_id = id, "book deleted");
		Ok(())
	}

	/// Applies a lending transition as one atomic unit.
	///
	/// The book row is claimed with a conditional update first, so concurrent
	/// callers serialize on SQLite's write lock and the loser re-reads the
	/// committed state to learn why it lost.
	pub async fn transition(&self, book_id: Bid, op: LendingOp, actor: &Principal) -> AppResult<Book> {
		let now = Utc::now();
		let mut tx = self.db.begin().await?;

		let claimed = match op {
			LendingOp::Checkout => {
				sqlx::query(
					r#"
UPDATE books SET
	checked_out = true, checked_out_at = ?, checked_out_by_id = ?, updated_at = ?
WHERE
	id = ? AND checked_out = false
					"#,
				)
				.bind(now)
				.bind(actor.id)
				.bind(now)
				.bind(book_id)
				.execute(&mut *tx)
				.await?
			},
			LendingOp::Checkin => {
				sqlx::query(
					r#"
UPDATE books SET
	checked_out = false, checked_out_at = NULL, checked_out_by_id = NULL, updated_at = ?
WHERE
	id = ? AND checked_out = true AND (checked_out_by_id = ? OR ?)
					"#,
				)
				.bind(now)
				.bind(book_id)
				.bind(actor.id)
				.bind(actor.is_admin())
				.execute(&mut *tx)
				.await?
			},
		};

		if claimed.rows_affected() == 0 {
			let current = fetch_book(&mut tx, book_id).await?;
			tx.rollback().await?;
			return Err(match lending::precondition(op, current.as_ref(), actor) {
				Err(err) => err,
				Ok(()) => AppError::InternalInconsistency(format!(
					"{op} of book {book_id} claimed no row although its preconditions hold"
				)),
			});
		}

		match op {
			LendingOp::Checkout => {
				sqlx::query("INSERT INTO borrow_records (book_id, user_id, borrowed_at) VALUES (?, ?, ?)")
					.bind(book_id)
					.bind(actor.id)
					.bind(now)
					.execute(&mut *tx)
					.await
					.map_err(|e| match AppError::from_db(e, "") {
						AppError::Conflict(_) => AppError::InternalInconsistency(format!(
							"available book {book_id} already had an open borrow record"
						)),
						other => other,
					})?;
			},
			LendingOp::Checkin => close_open_record(&mut tx, book_id, now).await?,
		}

		let book = fetch_book(&mut tx, book_id).await?.ok_or_else(|| not_found(book_id))?;
		tx.commit().await?;
		Ok(book)
	}
}

async fn close_open_record(
	conn: &mut SqliteConnection,
	book_id: Bid,
	now: chrono::DateTime<Utc>,
) -> AppResult<()> {
	let open = sqlx::query_as::<_, BorrowRecord>(&format!(
		"{SELECT_RECORD} WHERE book_id = ? AND returned_at IS NULL ORDER BY borrowed_at DESC, id DESC"
	))
	.bind(book_id)
	.fetch_all(&mut *conn)
	.await?;

	let Some((latest, rest)) = open.split_first() else {
		tracing::error!(book_id, "borrowed book has no open borrow record");
		return Err(AppError::InternalInconsistency(format!(
			"borrowed book {book_id} has no open borrow record"
		)));
	};
	if !rest.is_empty() {
		tracing::error!(book_id, extra = rest.len(), "closing newest of several open borrow records");
	}

	sqlx::query("UPDATE borrow_records SET returned_at = ? WHERE id = ?")
		.bind(now)
		.bind(latest.id)
		.execute(&mut *conn)
		.await?;
	Ok(())
}

async fn fetch_book(conn: &mut SqliteConnection, id: Bid) -> AppResult<Option<Book>> {
	let row = sqlx::query_as::<_, BookQuery>(&format!("{SELECT_BOOK} WHERE b.id = ?"))
		.bind(id)
		.fetch_optional(&mut *conn)
		.await?;
	row.map(Book::from_query).transpose()
}

fn not_found(id: Bid) -> AppError {
	AppError::NotFound(format!("book {id} not found"))
}

/// `%needle%` with LIKE wildcards in `needle` escaped.
fn like_pattern(needle: &str) -> String {
	let mut pattern = String::with_capacity(needle.len() + 2);
	pattern.push('%');
	for c in needle.chars() {
		if matches!(c, '%' | '_' | '\\') {
			pattern.push('\\');
		}
		pattern.push(c);
	}
	pattern.push('%');
	pattern
}
