use axum::{
	extract::rejection::{JsonRejection, PathRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
	#[error("{0}")]
	Validation(#[from] garde::Report),
	#[error("malformed payload: {0}")]
	MalformedPayload(String),
	#[error("{0}")]
	NotFound(String),
	#[error("{0}")]
	Conflict(String),
	#[error("{0}")]
	Forbidden(String),
	#[error("unauthorized")]
	Unauthorized,
	// the ledger and the book row disagree; never expected with correct use of the store
	#[error("catalog inconsistency: {0}")]
	InternalInconsistency(String),
	#[error("database error")]
	Database(#[source] sqlx::Error),
	#[error("password hashing failed")]
	PasswordHash(#[from] bcrypt::BcryptError),
	#[error("configuration error: {0}")]
	Config(String),
	#[error("i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("background task failed")]
	Join(#[from] tokio::task::JoinError),
}

impl AppError {
	/// Storage errors caused by a UNIQUE index surface as `Conflict`.
	pub fn from_db(err: sqlx::Error, conflict: &str) -> Self {
		match &err {
			sqlx::Error::Database(db) if db.is_unique_violation() => {
				AppError::Conflict(conflict.to_string())
			},
			_ => AppError::Database(err),
		}
	}
}

impl From<sqlx::Error> for AppError {
	fn from(err: sqlx::Error) -> Self {
		AppError::Database(err)
	}
}

impl From<JsonRejection> for AppError {
	fn from(rejection: JsonRejection) -> Self {
		AppError::MalformedPayload(rejection.body_text())
	}
}

// ids are opaque: one that does not parse names nothing
impl From<PathRejection> for AppError {
	fn from(rejection: PathRejection) -> Self {
		AppError::NotFound(rejection.body_text())
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		let status = match &self {
			AppError::Validation(_) | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
			AppError::NotFound(_) => StatusCode::NOT_FOUND,
			AppError::Conflict(_) => StatusCode::CONFLICT,
			AppError::Forbidden(_) => StatusCode::FORBIDDEN,
			AppError::Unauthorized => StatusCode::UNAUTHORIZED,
			e @ (AppError::InternalInconsistency(_)
			| AppError::Database(_)
			| AppError::PasswordHash(_)
			| AppError::Config(_)
			| AppError::Io(_)
			| AppError::Join(_)) => {
				tracing::error!(
					error.cause_chain = ?e,
					error.message = %e,
					"Unexpected error happened"
				);
				StatusCode::INTERNAL_SERVER_ERROR
			},
		};

		(status, Json(json!({ "error": self.to_string() }))).into_response()
	}
}

pub type AppResult<T> = Result<T, AppError>;
