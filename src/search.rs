//! Query normalization and relevance scoring.
//!
//! Both functions are pure so they can be exercised without a catalog.

use std::collections::HashSet;

use crate::types::Book;

/// Flat score bonus for a book nobody currently holds.
pub const AVAILABILITY_BOOST: f64 = 0.5;

/// Lower-cases `text`, blanks out everything outside `[a-z0-9]` and
/// whitespace, then splits on whitespace. Order and duplicates are kept.
pub fn normalize(text: &str) -> Vec<String> {
	text.to_lowercase()
		.chars()
		.map(|c| {
			if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() {
				c
			} else {
				' '
			}
		})
		.collect::<String>()
		.split_whitespace()
		.map(str::to_string)
		.collect()
}

fn haystack(book: &Book) -> HashSet<String> {
	let text = [
		book.title.as_str(),
		book.author.as_str(),
		book.genre.as_deref().unwrap_or(""),
		book.description.as_deref().unwrap_or(""),
	]
	.join(" ");
	normalize(&text).into_iter().collect()
}

/// Scores `book` against an already normalized query.
pub fn score_tokens(book: &Book, query_tokens: &[String]) -> f64 {
	if query_tokens.is_empty() {
		return 0.0;
	}

	let words = haystack(book);
	let matches = query_tokens.iter().filter(|token| words.contains(*token)).count();
	let boost = if book.is_available() { AVAILABILITY_BOOST } else { 0.0 };

	matches as f64 + boost
}

/// One point per query token found in the book's text, plus
/// [`AVAILABILITY_BOOST`] when the book is on the shelf. An empty query
/// scores zero.
pub fn score(book: &Book, query: &str) -> f64 {
	score_tokens(book, &normalize(query))
}

#[cfg(test)]
pub(crate) mod tests {
	use chrono::Utc;

	use super::*;
	use crate::types::{BorrowStatus, Borrower};

	pub(crate) fn book(id: i64, title: &str, available: bool) -> Book {
		let now = Utc::now();
		let status = if available {
			BorrowStatus::Available
		} else {
			BorrowStatus::Borrowed(
				Borrower { id: 7, name: "alice".into(), email: "alice@library.local".into() },
				now,
			)
		};
		Book {
			id,
			title: title.to_string(),
			author: "Someone".to_string(),
			genre: None,
			isbn: None,
			description: None,
			published_year: None,
			status,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn normalize_lowercases_and_splits() {
		assert_eq!(normalize("Hello World"), vec!["hello", "world"]);
	}

	#[test]
	fn normalize_blanks_punctuation() {
		assert_eq!(
			normalize("Data-Intensive, Applications!"),
			vec!["data", "intensive", "applications"]
		);
		assert_eq!(normalize("C++ & Rust 2024"), vec!["c", "rust", "2024"]);
	}

	#[test]
	fn normalize_keeps_order_and_duplicates() {
		assert_eq!(normalize("rust go rust"), vec!["rust", "go", "rust"]);
	}

	#[test]
	fn normalize_empty_and_blank() {
		assert!(normalize("").is_empty());
		assert!(normalize("  \t\n ").is_empty());
		assert!(normalize("!!! ???").is_empty());
	}

	#[test]
	fn normalize_drops_non_ascii_letters() {
		assert_eq!(normalize("Café olé"), vec!["caf", "ol"]);
	}

	#[test]
	fn empty_query_scores_zero() {
		assert_eq!(score(&book(1, "Clean Code", true), ""), 0.0);
		assert_eq!(score(&book(1, "Clean Code", true), " -- "), 0.0);
	}

	#[test]
	fn single_match_plus_boost() {
		assert_eq!(score(&book(1, "Clean Code", true), "clean"), 1.5);
		assert_eq!(score(&book(1, "Clean Code", false), "clean"), 1.0);
	}

	#[test]
	fn no_match_only_boost() {
		assert_eq!(score(&book(1, "Clean Code", true), "habits"), 0.5);
		assert_eq!(score(&book(1, "Clean Code", false), "habits"), 0.0);
	}

	#[test]
	fn exact_tokens_only() {
		// "clea" is a prefix of "clean" and must not count
		assert_eq!(score(&book(1, "Clean Code", false), "clea cod"), 0.0);
	}

	#[test]
	fn repeated_query_tokens_each_count() {
		assert_eq!(score(&book(1, "Clean Code", false), "clean clean code"), 3.0);
	}

	#[test]
	fn genre_and_description_are_searched() {
		let mut b = book(1, "Atomic Habits", false);
		b.genre = Some("Self Development".into());
		b.description = Some("Practical framework for building good habits.".into());
		assert_eq!(score(&b, "framework development"), 2.0);
		assert_eq!(score(&b, "SOMEONE"), 1.0);
	}
}
