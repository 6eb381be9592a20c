//! Demo accounts and books for a fresh database. Safe to run repeatedly.

use crate::{
	error::{AppError, AppResult},
	state::AppState,
	types::{BookForm, FormRegister, Role},
};

const ACCOUNTS: [(&str, &str, &str, Role); 2] = [
	("Library Admin", "admin@library.local", "Admin123!", Role::Admin),
	("Library Member", "member@library.local", "Member123!", Role::Member),
];

const BOOKS: [(&str, &str, &str, &str, i32, &str); 4] = [
	(
		"Clean Code",
		"Robert C. Martin",
		"Software Engineering",
		"9780132350884",
		2008,
		"Best practices for writing maintainable code.",
	),
	(
		"The Pragmatic Programmer",
		"Andrew Hunt, David Thomas",
		"Software Engineering",
		"9780135957059",
		2019,
		"Timeless tips for pragmatic software craftsmanship.",
	),
	(
		"Designing Data-Intensive Applications",
		"Martin Kleppmann",
		"Data Systems",
		"9781449373320",
		2017,
		"Concepts and patterns for reliable distributed systems.",
	),
	(
		"Atomic Habits",
		"James Clear",
		"Self Development",
		"9780735211292",
		2018,
		"Practical framework for building good habits.",
	),
];

pub async fn seed(state: &AppState) -> AppResult<()> {
	for (name, email, pass, role) in ACCOUNTS {
		let form = FormRegister { name: name.into(), email: email.into(), pass: pass.into() };
		skip_existing(state.accounts.create(form, role).await.map(drop))?;
	}

	for (title, author, genre, isbn, year, description) in BOOKS {
		let form = BookForm {
			title: title.into(),
			author: author.into(),
			genre: Some(genre.into()),
			isbn: Some(isbn.into()),
			description: Some(description.into()),
			published_year: Some(year),
		};
		skip_existing(state.catalog.create_book(form).await.map(drop))?;
	}

	tracing::info!("database seeded");
	Ok(())
}

fn skip_existing(result: AppResult<()>) -> AppResult<()> {
	match result {
		Err(AppError::Conflict(_)) => Ok(()),
		other => other,
	}
}
