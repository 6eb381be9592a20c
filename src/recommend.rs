use serde::Serialize;

use crate::{
	search::{normalize, score_tokens, AVAILABILITY_BOOST},
	types::{Bid, Book},
};

pub const DEFAULT_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
	High,
	Medium,
	Low,
}

impl Confidence {
	pub fn from_score(score: f64) -> Self {
		if score >= 3.0 {
			Confidence::High
		} else if score >= 1.5 {
			Confidence::Medium
		} else {
			Confidence::Low
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Confidence::High => "high",
			Confidence::Medium => "medium",
			Confidence::Low => "low",
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
	pub id: Bid,
	pub title: String,
	pub author: String,
	pub genre: Option<String>,
	pub checked_out: bool,
	pub reason: String,
	pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
	pub total: usize,
	pub available: usize,
	/// Books matching at least one query term; absent without a query.
	pub matches: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
	pub query: String,
	pub summary: String,
	pub counts: CatalogCounts,
	pub recommendations: Vec<Recommendation>,
}

pub fn reason(title: &str, score: f64, available: bool) -> String {
	format!(
		"{title} has a {} topical match and is {}.",
		Confidence::from_score(score).as_str(),
		if available { "currently available" } else { "currently borrowed" }
	)
}

/// Ranks `books` against `query` and keeps the best `limit`.
///
/// With a query, books scoring zero are dropped; an available book that
/// matches no term still carries the availability boost and may fill the
/// tail. Without query terms every book scores just its availability boost,
/// so available books come first. Ties are broken by title, then id.
///
/// The match count in the summary covers books hitting at least one query
/// term across the whole catalog, not the boost-only filler nor the cut made
/// by `limit`.
pub fn recommend(books: &[Book], query: &str, limit: usize) -> Recommendations {
	let query = query.trim();
	let tokens = normalize(query);

	let mut scored: Vec<(&Book, f64)> = books
		.iter()
		.map(|book| (book, rank_score(book, &tokens)))
		.filter(|(_, score)| query.is_empty() || *score > 0.0)
		.collect();

	scored.sort_by(|(a, sa), (b, sb)| {
		sb.total_cmp(sa)
			.then_with(|| a.title.cmp(&b.title))
			.then_with(|| a.id.cmp(&b.id))
	});

	let counts = CatalogCounts {
		total: books.len(),
		available: books.iter().filter(|b| b.is_available()).count(),
		matches: (!query.is_empty()).then(|| scored.iter().filter(|(_, score)| *score >= 1.0).count()),
	};

	let summary = match counts.matches {
		Some(matches) => format!(
			"Found {matches} matches for \"{query}\". {}/{} books are available right now.",
			counts.available, counts.total
		),
		None => format!(
			"Catalog overview: {} books total and {} available now.",
			counts.total, counts.available
		),
	};

	let recommendations = scored
		.into_iter()
		.take(limit)
		.map(|(book, score)| Recommendation {
			id: book.id,
			title: book.title.clone(),
			author: book.author.clone(),
			genre: book.genre.clone(),
			checked_out: book.status.is_borrowed(),
			reason: reason(&book.title, score, book.is_available()),
			score: round2(score),
		})
		.collect();

	Recommendations {
		query: query.to_string(),
		summary,
		counts,
		recommendations,
	}
}

// score_tokens is zero for an empty query; ranking still wants the boost
fn rank_score(book: &Book, tokens: &[String]) -> f64 {
	match (tokens.is_empty(), book.is_available()) {
		(false, _) => score_tokens(book, tokens),
		(true, true) => AVAILABILITY_BOOST,
		(true, false) => 0.0,
	}
}

fn round2(score: f64) -> f64 {
	(score * 100.0).round() / 100.0
}
