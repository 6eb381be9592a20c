//! Checkout / checkin workflow.
//!
//! A book is either available or borrowed by exactly one account.
//! `checkout` moves it to borrowed, `checkin` back to available; there is no
//! waitlist, so a checkout of a borrowed book is simply a conflict.

use crate::{
	catalog::CatalogStore,
	error::{AppError, AppResult},
	types::{Bid, Book, LendingOp, Principal},
};

/// Decides whether `op` may run on `book` for `actor`.
///
/// The store evaluates the same rules inside its conditional update; this is
/// what it consults to report *why* a transition was refused.
pub fn precondition(op: LendingOp, book: Option<&Book>, actor: &Principal) -> AppResult<()> {
	let Some(book) = book else {
		return Err(AppError::NotFound("book not found".to_string()));
	};

	match op {
		LendingOp::Checkout => {
			if book.status.is_borrowed() {
				return Err(AppError::Conflict("book is already borrowed".to_string()));
			}
		},
		LendingOp::Checkin => {
			if book.status.is_available() {
				return Err(AppError::Conflict("book is not currently borrowed".to_string()));
			}
			if !may_return(book, actor) {
				return Err(AppError::Forbidden(
					"only the borrower or an admin can return this book".to_string(),
				));
			}
		},
	}
	Ok(())
}

/// The current borrower can always return a book; admins can return any.
pub fn may_return(book: &Book, actor: &Principal) -> bool {
	actor.is_admin() || book.status.is_with_viewer(actor.id)
}

pub async fn checkout(store: &CatalogStore, book_id: Bid, actor: &Principal) -> AppResult<Book> {
	run(store, book_id, LendingOp::Checkout, actor).await
}

pub async fn checkin(store: &CatalogStore, book_id: Bid, actor: &Principal) -> AppResult<Book> {
	run(store, book_id, LendingOp::Checkin, actor).await
}

async fn run(store: &CatalogStore, book_id: Bid, op: LendingOp, actor: &Principal) -> AppResult<Book> {
	match store.transition(book_id, op, actor).await {
		Ok(book) => {
			tracing::info!(%op, book_id, actor = actor.id, role = actor.role.as_str(), "lending transition");
			Ok(book)
		},
		Err(err @ (AppError::NotFound(_) | AppError::Conflict(_) | AppError::Forbidden(_))) => {
			tracing::debug!(%op, book_id, actor = actor.id, reason = %err, "lending transition refused");
			Err(err)
		},
		Err(err) => {
			tracing::warn!(%op, book_id, actor = actor.id, error = %err, "lending transition failed");
			Err(err)
		},
	}
}
