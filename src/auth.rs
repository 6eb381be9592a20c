//! Accounts and cookie sessions.
//!
//! The catalog only ever sees a [`Principal`]; everything about passwords and
//! session tokens stays in here.

use std::{collections::HashSet, sync::Arc};

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use garde::Validate;
use tokio::task;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
	error::{AppError, AppResult},
	sql::DB,
	state::AppState,
	types::{Account, AccountQuery, FormLogin, FormRegister, Principal, Role},
};

pub const SESSION_COOKIE: &str = "session";
pub const BCRYPT_COST: u32 = 10;

/// Emails that are promoted to ADMIN when they register or sign in.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
	emails: HashSet<String>,
}

impl AdminPolicy {
	pub fn new<I, S>(emails: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self {
			emails: emails.into_iter().map(|e| e.as_ref().trim().to_lowercase()).collect(),
		}
	}

	pub fn role_for(&self, email: &str) -> Role {
		if self.emails.contains(&email.trim().to_lowercase()) {
			Role::Admin
		} else {
			Role::Member
		}
	}
}

#[derive(Clone)]
pub struct Accounts {
	db: DB,
	policy: Arc<AdminPolicy>,
}

impl Accounts {
	pub fn new(db: DB, policy: AdminPolicy) -> Self {
		Self { db, policy: Arc::new(policy) }
	}

	pub async fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
		let row = sqlx::query_as::<_, AccountQuery>(
			"SELECT id, name, email, pass_hash, role FROM accounts WHERE email = ?",
		)
		.bind(email.trim().to_lowercase())
		.fetch_optional(&self.db)
		.await?;
		row.map(Account::from_query).transpose()
	}

	/// Creates a MEMBER account, or an ADMIN one for allow-listed emails.
	pub async fn register(&self, form: FormRegister) -> AppResult<Account> {
		let role = self.policy.role_for(&form.email);
		self.create(form, role).await
	}

	/// Creates an account with an explicit role, bypassing the allow-list.
	pub async fn create(&self, form: FormRegister, role: Role) -> AppResult<Account> {
		form.validate()?;
		let email = form.email.trim().to_lowercase();
		let pass_hash = hash_password(form.pass.clone()).await?;

		let inserted = sqlx::query(
			r#"
INSERT INTO accounts
	(name, email, pass_hash, role, created_at)
VALUES
	(?, ?, ?, ?, ?)
			"#,
		)
		.bind(&form.name)
		.bind(&email)
		.bind(&pass_hash)
		.bind(role.as_str())
		.bind(Utc::now())
		.execute(&self.db)
		.await
		.map_err(|e| AppError::from_db(e, "email already registered"))?;

		tracing::info!(user_id = inserted.last_insert_rowid(), role = role.as_str(), "account registered");
		Ok(Account {
			uid: inserted.last_insert_rowid(),
			name: form.name,
			email,
			pass_hash,
			role,
		})
	}

	/// Verifies credentials and opens a session, returning its token.
	pub async fn login(&self, form: FormLogin) -> AppResult<(String, Principal)> {
		let Some(mut account) = self.find_by_email(&form.email).await? else {
			return Err(AppError::Unauthorized);
		};
		if !verify_password(form.pass, account.pass_hash.clone()).await? {
			tracing::debug!(user_id = account.uid, "wrong password");
			return Err(AppError::Unauthorized);
		}

		if account.role == Role::Member && self.policy.role_for(&account.email) == Role::Admin {
			sqlx::query("UPDATE accounts SET role = ? WHERE id = ?")
				.bind(Role::Admin.as_str())
				.bind(account.uid)
				.execute(&self.db)
				.await?;
			tracing::info!(user_id = account.uid, "account promoted to admin by allow-list");
			account.role = Role::Admin;
		}

		let token = Uuid::new_v4().to_string();
		sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
			.bind(&token)
			.bind(account.uid)
			.bind(Utc::now())
			.execute(&self.db)
			.await?;

		Ok((token, account.into()))
	}

	pub async fn logout(&self, token: &str) -> AppResult<()> {
		sqlx::query("DELETE FROM sessions WHERE token = ?")
			.bind(token)
			.execute(&self.db)
			.await?;
		Ok(())
	}

	pub async fn principal_for_token(&self, token: &str) -> AppResult<Option<Principal>> {
		let row = sqlx::query_as::<_, AccountQuery>(
			r#"
SELECT
	a.id, a.name, a.email, a.pass_hash, a.role
FROM
	sessions s
	JOIN accounts a ON a.id = s.user_id
WHERE
	s.token = ?
			"#,
		)
		.bind(token)
		.fetch_optional(&self.db)
		.await?;

		row.map(|r| Account::from_query(r).map(Principal::from)).transpose()
	}
}

// bcrypt blocks for tens of milliseconds per call; run it off the async workers
async fn hash_password(pass: String) -> AppResult<String> {
	Ok(task::spawn_blocking(move || bcrypt::hash(pass, BCRYPT_COST)).await??)
}

async fn verify_password(pass: String, hash: String) -> AppResult<bool> {
	Ok(task::spawn_blocking(move || bcrypt::verify(pass, &hash)).await??)
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let cookies = Cookies::from_request_parts(parts, state)
			.await
			.map_err(|_| AppError::Unauthorized)?;
		let token = cookies
			.get(SESSION_COOKIE)
			.map(|c| c.value().to_string())
			.ok_or(AppError::Unauthorized)?;

		state
			.accounts
			.principal_for_token(&token)
			.await?
			.ok_or(AppError::Unauthorized)
	}
}

/// A [`Principal`] holding the ADMIN role.
pub struct AdminPrincipal(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AdminPrincipal {
	type Rejection = AppError;

	async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
		let principal = Principal::from_request_parts(parts, state).await?;
		match principal.role {
			Role::Admin => Ok(AdminPrincipal(principal)),
			Role::Member => Err(AppError::Forbidden("admin role required".to_string())),
		}
	}
}
