use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use garde::Validate;
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};

use crate::error::{AppError, AppResult};

pub type Bid = i64;
pub type Uid = i64;
pub type Rid = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
	Admin,
	Member,
}

impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Admin => "ADMIN",
			Role::Member => "MEMBER",
		}
	}

	pub fn is_admin(self) -> bool {
		match self {
			Role::Admin => true,
			Role::Member => false,
		}
	}
}

impl FromStr for Role {
	type Err = AppError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ADMIN" => Ok(Role::Admin),
			"MEMBER" => Ok(Role::Member),
			other => Err(AppError::InternalInconsistency(format!("unknown role {other:?}"))),
		}
	}
}

/// The account currently holding a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Borrower {
	pub id: Uid,
	pub name: String,
	pub email: String,
}

/// Lending state of a book. The borrower and the checkout time only exist
/// together, so the three `checked_out*` columns can't drift apart in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum BorrowStatus {
	Available,
	Borrowed(Borrower, DateTime<Utc>),
}

impl BorrowStatus {
	pub fn is_available(&self) -> bool {
		matches!(self, BorrowStatus::Available)
	}

	pub fn is_borrowed(&self) -> bool {
		matches!(self, BorrowStatus::Borrowed(_, _))
	}

	pub fn borrower(&self) -> Option<&Borrower> {
		match self {
			BorrowStatus::Available => None,
			BorrowStatus::Borrowed(by, _) => Some(by),
		}
	}

	pub fn since(&self) -> Option<DateTime<Utc>> {
		match self {
			BorrowStatus::Available => None,
			BorrowStatus::Borrowed(_, at) => Some(*at),
		}
	}

	pub fn is_with_viewer(&self, viewer: Uid) -> bool {
		self.borrower().is_some_and(|by| by.id == viewer)
	}

	pub fn from_columns(
		checked_out: bool,
		by: Option<Borrower>,
		at: Option<DateTime<Utc>>,
	) -> AppResult<Self> {
		match (checked_out, by, at) {
			(false, None, None) => Ok(BorrowStatus::Available),
			(true, Some(by), Some(at)) => Ok(BorrowStatus::Borrowed(by, at)),
			(checked_out, by, at) => Err(AppError::InternalInconsistency(format!(
				"checked_out={checked_out} with borrower={} and checked_out_at={}",
				by.is_some(),
				at.is_some()
			))),
		}
	}
}

impl std::fmt::Display for BorrowStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			BorrowStatus::Available => "available",
			BorrowStatus::Borrowed(_, _) => "borrowed",
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Book {
	pub id: Bid,
	pub title: String,
	pub author: String,
	pub genre: Option<String>,
	pub isbn: Option<String>,
	pub description: Option<String>,
	pub published_year: Option<i32>,
	pub status: BorrowStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Book {
	pub fn from_query(info: BookQuery) -> AppResult<Self> {
		let borrower = match (info.checked_out_by_id, info.borrower_name, info.borrower_email) {
			(Some(id), Some(name), Some(email)) => Some(Borrower { id, name, email }),
			(None, _, _) => None,
			(Some(id), _, _) => {
				return Err(AppError::InternalInconsistency(format!(
					"book {} is held by missing account {id}",
					info.id
				)))
			},
		};
		let status = BorrowStatus::from_columns(info.checked_out, borrower, info.checked_out_at)
			.map_err(|e| match e {
				AppError::InternalInconsistency(msg) => {
					AppError::InternalInconsistency(format!("book {}: {msg}", info.id))
				},
				other => other,
			})?;

		Ok(Book {
			id: info.id,
			title: info.title,
			author: info.author,
			genre: info.genre,
			isbn: info.isbn,
			description: info.description,
			published_year: info.published_year,
			status,
			created_at: info.created_at,
			updated_at: info.updated_at,
		})
	}

	pub fn is_available(&self) -> bool {
		self.status.is_available()
	}
}

// Flattened wire shape: `checked_out`, `checked_out_at`, `checked_out_by`.
impl Serialize for Book {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut s = serializer.serialize_struct("Book", 12)?;
		s.serialize_field("id", &self.id)?;
		s.serialize_field("title", &self.title)?;
		s.serialize_field("author", &self.author)?;
		s.serialize_field("genre", &self.genre)?;
		s.serialize_field("isbn", &self.isbn)?;
		s.serialize_field("description", &self.description)?;
		s.serialize_field("published_year", &self.published_year)?;
		s.serialize_field("checked_out", &self.status.is_borrowed())?;
		s.serialize_field("checked_out_at", &self.status.since())?;
		s.serialize_field("checked_out_by", &self.status.borrower())?;
		s.serialize_field("created_at", &self.created_at)?;
		s.serialize_field("updated_at", &self.updated_at)?;
		s.end()
	}
}

/// Row shape of `books` joined with the holding account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BookQuery {
	pub id: Bid,
	pub title: String,
	pub author: String,
	pub genre: Option<String>,
	pub isbn: Option<String>,
	pub description: Option<String>,
	pub published_year: Option<i32>,
	pub checked_out: bool,
	pub checked_out_at: Option<DateTime<Utc>>,
	pub checked_out_by_id: Option<Uid>,
	pub borrower_name: Option<String>,
	pub borrower_email: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// One entry of the lending ledger.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct BorrowRecord {
	pub id: Rid,
	pub book_id: Bid,
	pub user_id: Uid,
	pub borrowed_at: DateTime<Utc>,
	pub returned_at: Option<DateTime<Utc>>,
}

impl BorrowRecord {
	pub fn is_open(&self) -> bool {
		self.returned_at.is_none()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LendingOp {
	Checkout,
	Checkin,
}

impl std::fmt::Display for LendingOp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			LendingOp::Checkout => "checkout",
			LendingOp::Checkin => "checkin",
		})
	}
}

#[derive(Debug, Clone)]
pub struct Account {
	pub uid: Uid,
	pub name: String,
	pub email: String,
	pub pass_hash: String,
	pub role: Role,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountQuery {
	pub id: Uid,
	pub name: String,
	pub email: String,
	pub pass_hash: String,
	pub role: String,
}

impl Account {
	pub fn from_query(info: AccountQuery) -> AppResult<Self> {
		Ok(Account {
			uid: info.id,
			name: info.name,
			email: info.email,
			pass_hash: info.pass_hash,
			role: info.role.parse()?,
		})
	}
}

/// Authenticated identity of the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
	pub id: Uid,
	pub email: String,
	pub name: String,
	pub role: Role,
}

impl Principal {
	pub fn is_admin(&self) -> bool {
		self.role.is_admin()
	}
}

impl From<Account> for Principal {
	fn from(account: Account) -> Self {
		Principal {
			id: account.uid,
			email: account.email,
			name: account.name,
			role: account.role,
		}
	}
}

#[derive(Deserialize, Debug)]
pub struct FormLogin {
	pub email: String,
	#[serde(alias = "password")]
	pub pass: String,
}

#[derive(Deserialize, Debug, Validate)]
pub struct FormRegister {
	#[garde(length(chars, min = 2, max = 100))]
	pub name: String,
	#[garde(email)]
	pub email: String,
	#[garde(length(chars, min = 8, max = 128))]
	#[serde(alias = "password")]
	pub pass: String,
}

/// Input for creating or replacing a book's descriptive fields.
#[derive(Deserialize, Debug, Clone, Default, Validate)]
pub struct BookForm {
	#[garde(length(chars, min = 1, max = 200))]
	pub title: String,
	#[garde(length(chars, min = 1, max = 120))]
	pub author: String,
	#[garde(length(chars, max = 80))]
	#[serde(default)]
	pub genre: Option<String>,
	#[garde(length(chars, max = 40))]
	#[serde(default)]
	pub isbn: Option<String>,
	#[garde(length(chars, max = 800))]
	#[serde(default)]
	pub description: Option<String>,
	#[garde(custom(valid_published_year))]
	#[serde(default, alias = "publishedYear")]
	pub published_year: Option<i32>,
}

impl BookForm {
	/// Empty optional strings are stored as NULL.
	pub fn normalized(self) -> Self {
		BookForm {
			genre: blank_to_none(self.genre),
			isbn: blank_to_none(self.isbn),
			description: blank_to_none(self.description),
			..self
		}
	}
}

fn blank_to_none(value: Option<String>) -> Option<String> {
	value.filter(|v| !v.is_empty())
}

fn valid_published_year(value: &Option<i32>, _ctx: &()) -> garde::Result {
	let Some(year) = value else {
		return Ok(());
	};
	let max = Utc::now().year() + 1;
	if (0..=max).contains(year) {
		Ok(())
	} else {
		Err(garde::Error::new(format!("published year must be within 0..={max}")))
	}
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
	#[serde(default)]
	pub q: Option<String>,
}

impl SearchParams {
	pub fn query(&self) -> &str {
		self.q.as_deref().map(str::trim).unwrap_or("")
	}
}
