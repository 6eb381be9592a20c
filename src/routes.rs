use axum::{
	extract::{FromRequest, FromRequestParts, Path, Query, State},
	http::StatusCode,
	routing::{get, post},
	Json, Router,
};
use serde_json::{json, Value};
use tower_cookies::{cookie::SameSite, Cookie, CookieManagerLayer, Cookies};
use tower_http::trace::TraceLayer;

use crate::{
	auth::{AdminPrincipal, SESSION_COOKIE},
	catalog::ListOrder,
	error::{AppError, AppResult},
	lending,
	recommend::{recommend, Recommendations, DEFAULT_LIMIT},
	state::AppState,
	types::{Bid, BookForm, FormLogin, FormRegister, Principal, SearchParams},
};

/// `Json` whose rejections are reported as [`AppError::MalformedPayload`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// `Path` whose rejections are reported as [`AppError::NotFound`].
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct IdPath<T>(pub T);

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/register", post(register))
		.route("/login", post(login))
		.route("/logout", post(logout))
		.route("/me", get(me))
		.route("/books", get(list_books).post(create_book))
		.route("/books/:id", get(show_book).put(update_book).delete(delete_book))
		.route("/books/:id/checkout", post(checkout))
		.route("/books/:id/checkin", post(checkin))
		.route("/books/:id/history", get(history))
		.route("/recommendations", get(recommendations))
		.layer(CookieManagerLayer::new())
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn register(
	State(state): State<AppState>,
	JsonBody(form): JsonBody<FormRegister>,
) -> AppResult<(StatusCode, Json<Value>)> {
	state.accounts.register(form).await?;
	Ok((StatusCode::CREATED, Json(json!({ "ok": true }))))
}

async fn login(
	State(state): State<AppState>,
	cookies: Cookies,
	JsonBody(form): JsonBody<FormLogin>,
) -> AppResult<Json<Value>> {
	let (token, principal) = state.accounts.login(form).await?;
	cookies.add(
		Cookie::build((SESSION_COOKIE, token))
			.path("/")
			.http_only(true)
			.same_site(SameSite::Lax)
			.build(),
	);
	Ok(Json(json!({ "user": principal })))
}

async fn logout(State(state): State<AppState>, cookies: Cookies) -> AppResult<Json<Value>> {
	if let Some(cookie) = cookies.get(SESSION_COOKIE) {
		state.accounts.logout(cookie.value()).await?;
	}
	cookies.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
	Ok(Json(json!({ "ok": true })))
}

async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Value>> {
	let books = state.catalog.books_held_by(principal.id).await?;
	let loans = state.catalog.open_records_for_user(principal.id).await?;
	Ok(Json(json!({ "user": principal, "books": books, "loans": loans })))
}

async fn list_books(
	State(state): State<AppState>,
	_principal: Principal,
	Query(params): Query<SearchParams>,
) -> AppResult<Json<Value>> {
	let books = state.catalog.list_books(Some(params.query()), ListOrder::Newest).await?;
	Ok(Json(json!({ "books": books })))
}

async fn show_book(
	State(state): State<AppState>,
	_principal: Principal,
	IdPath(id): IdPath<Bid>,
) -> AppResult<Json<Value>> {
	let book = state.catalog.find_book(id).await?;
	Ok(Json(json!({ "book": book })))
}

async fn create_book(
	State(state): State<AppState>,
	AdminPrincipal(_admin): AdminPrincipal,
	JsonBody(form): JsonBody<BookForm>,
) -> AppResult<(StatusCode, Json<Value>)> {
	let book = state.catalog.create_book(form).await?;
	Ok((StatusCode::CREATED, Json(json!({ "book": book }))))
}

async fn update_book(
	State(state): State<AppState>,
	AdminPrincipal(_admin): AdminPrincipal,
	IdPath(id): IdPath<Bid>,
	JsonBody(form): JsonBody<BookForm>,
) -> AppResult<Json<Value>> {
	let book = state.catalog.update_book(id, form).await?;
	Ok(Json(json!({ "book": book })))
}

async fn delete_book(
	State(state): State<AppState>,
	AdminPrincipal(_admin): AdminPrincipal,
	IdPath(id): IdPath<Bid>,
) -> AppResult<Json<Value>> {
	state.catalog.delete_book(id).await?;
	Ok(Json(json!({ "ok": true })))
}

async fn checkout(
	State(state): State<AppState>,
	principal: Principal,
	IdPath(id): IdPath<Bid>,
) -> AppResult<Json<Value>> {
	let book = lending::checkout(&state.catalog, id, &principal).await?;
	Ok(Json(json!({ "book": book })))
}

async fn checkin(
	State(state): State<AppState>,
	principal: Principal,
	IdPath(id): IdPath<Bid>,
) -> AppResult<Json<Value>> {
	let book = lending::checkin(&state.catalog, id, &principal).await?;
	Ok(Json(json!({ "book": book })))
}

async fn history(
	State(state): State<AppState>,
	_principal: Principal,
	IdPath(id): IdPath<Bid>,
) -> AppResult<Json<Value>> {
	let records = state.catalog.history(id).await?;
	Ok(Json(json!({ "history": records })))
}

async fn recommendations(
	State(state): State<AppState>,
	_principal: Principal,
	Query(params): Query<SearchParams>,
) -> AppResult<Json<Recommendations>> {
	let books = state.catalog.list_books(None, ListOrder::AvailabilityThenTitle).await?;
	Ok(Json(recommend(&books, params.query(), DEFAULT_LIMIT)))
}

#[cfg(test)]
mod tests {
	use axum::{
		body::Body,
		http::{header, Request},
	};
	use http_body_util::BodyExt;
	use tower::ServiceExt;

	use super::*;
	use crate::{auth::AdminPolicy, sql};

	struct Client {
		app: Router,
	}

	impl Client {
		async fn new() -> Self {
			let db = sql::open_in_memory().await.unwrap();
			let state = AppState::new(db, AdminPolicy::new(["admin@library.local"]));
			Self { app: router(state) }
		}

		async fn send(
			&self,
			method: &str,
			uri: &str,
			session: Option<&str>,
			body: Option<Value>,
		) -> (StatusCode, Value, Option<String>) {
			let mut req = Request::builder().method(method).uri(uri);
			if let Some(token) = session {
				req = req.header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
			}
			let req = match body {
				Some(body) => req
					.header(header::CONTENT_TYPE, "application/json")
					.body(Body::from(body.to_string()))
					.unwrap(),
				None => req.body(Body::empty()).unwrap(),
			};

			let res = self.app.clone().oneshot(req).await.unwrap();
			let status = res.status();
			let session = res
				.headers()
				.get(header::SET_COOKIE)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.split(';').next())
				.and_then(|v| v.strip_prefix(&format!("{SESSION_COOKIE}=")))
				.map(str::to_string);
			let bytes = res.into_body().collect().await.unwrap().to_bytes();
			let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
			(status, value, session)
		}

		/// Registers `email` and returns a session token for it.
		async fn sign_up(&self, name: &str, email: &str) -> String {
			let (status, _, _) = self
				.send(
					"POST",
					"/register",
					None,
					Some(json!({ "name": name, "email": email, "password": "Secret123!" })),
				)
				.await;
			assert_eq!(status, StatusCode::CREATED);
			let (status, _, session) = self
				.send("POST", "/login", None, Some(json!({ "email": email, "password": "Secret123!" })))
				.await;
			assert_eq!(status, StatusCode::OK);
			session.unwrap()
		}

		async fn add_book(&self, admin: &str, body: Value) -> i64 {
			let (status, value, _) = self.send("POST", "/books", Some(admin), Some(body)).await;
			assert_eq!(status, StatusCode::CREATED, "{value}");
			value["book"]["id"].as_i64().unwrap()
		}
	}

	#[tokio::test]
	async fn requests_without_session_are_unauthorized() {
		let client = Client::new().await;
		for (method, uri) in [
			("GET", "/books"),
			("GET", "/recommendations"),
			("POST", "/books/1/checkout"),
			("POST", "/books/1/checkin"),
			("GET", "/me"),
		] {
			let (status, _, _) = client.send(method, uri, None, None).await;
			assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
		}
		let (status, _, _) = client.send("GET", "/books", Some("bogus"), None).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn members_cannot_manage_the_catalog() {
		let client = Client::new().await;
		let member = client.sign_up("Member", "member@library.local").await;
		let book = json!({ "title": "Clean Code", "author": "Robert C. Martin" });

		let (status, _, _) = client.send("POST", "/books", Some(&member), Some(book.clone())).await;
		assert_eq!(status, StatusCode::FORBIDDEN);
		let (status, _, _) = client.send("PUT", "/books/1", Some(&member), Some(book)).await;
		assert_eq!(status, StatusCode::FORBIDDEN);
		let (status, _, _) = client.send("DELETE", "/books/1", Some(&member), None).await;
		assert_eq!(status, StatusCode::FORBIDDEN);
	}

	#[tokio::test]
	async fn admin_crud_and_validation() {
		let client = Client::new().await;
		let admin = client.sign_up("Admin", "admin@library.local").await;

		let id = client
			.add_book(
				&admin,
				json!({
					"title": "Clean Code",
					"author": "Robert C. Martin",
					"isbn": "9780132350884",
					"genre": "",
					"publishedYear": 2008
				}),
			)
			.await;

		let (status, value, _) = client.send("GET", &format!("/books/{id}"), Some(&admin), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(value["book"]["genre"], Value::Null);
		assert_eq!(value["book"]["published_year"], 2008);
		assert_eq!(value["book"]["checked_out"], false);

		let (status, _, _) = client
			.send("POST", "/books", Some(&admin), Some(json!({ "title": "", "author": "x" })))
			.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		let (status, _, _) = client
			.send("POST", "/books", Some(&admin), Some(json!({ "title": "x", "author": "y", "publishedYear": 99999 })))
			.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		let (status, _, _) = client.send("POST", "/books", Some(&admin), Some(json!({ "title": 5 }))).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		let (status, _, _) = client
			.send("POST", "/books", Some(&admin), Some(json!({ "title": "Copy", "author": "y", "isbn": "9780132350884" })))
			.await;
		assert_eq!(status, StatusCode::CONFLICT);

		let (status, value, _) = client
			.send(
				"PUT",
				&format!("/books/{id}"),
				Some(&admin),
				Some(json!({ "title": "Clean Code (2nd)", "author": "Robert C. Martin" })),
			)
			.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(value["book"]["title"], "Clean Code (2nd)");
		assert_eq!(value["book"]["isbn"], Value::Null);

		let (status, _, _) = client
			.send("PUT", "/books/999", Some(&admin), Some(json!({ "title": "t", "author": "a" })))
			.await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		let (status, _, _) = client.send("DELETE", &format!("/books/{id}"), Some(&admin), None).await;
		assert_eq!(status, StatusCode::OK);
		let (status, _, _) = client.send("DELETE", &format!("/books/{id}"), Some(&admin), None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn atomic_habits_scenario() {
		let client = Client::new().await;
		let bob = client.sign_up("Bob", "admin@library.local").await;
		let alice = client.sign_up("Alice", "alice@library.local").await;
		let carol = client.sign_up("Carol", "carol@library.local").await;
		let id = client.add_book(&bob, json!({ "title": "Atomic Habits", "author": "James Clear" })).await;

		let (status, value, _) = client.send("POST", &format!("/books/{id}/checkout"), Some(&alice), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(value["book"]["checked_out"], true);
		assert_eq!(value["book"]["checked_out_by"]["name"], "Alice");

		let (status, _, _) = client.send("POST", &format!("/books/{id}/checkout"), Some(&carol), None).await;
		assert_eq!(status, StatusCode::CONFLICT);
		let (status, _, _) = client.send("POST", &format!("/books/{id}/checkin"), Some(&carol), None).await;
		assert_eq!(status, StatusCode::FORBIDDEN);
		let (status, _, _) = client.send("DELETE", &format!("/books/{id}"), Some(&bob), None).await;
		assert_eq!(status, StatusCode::CONFLICT);

		let (_, value, _) = client.send("GET", "/me", Some(&alice), None).await;
		assert_eq!(value["books"][0]["id"], id);
		assert_eq!(value["loans"].as_array().unwrap().len(), 1);
		assert_eq!(value["loans"][0]["book_id"], id);
		assert_eq!(value["loans"][0]["returned_at"], Value::Null);
		let (_, value, _) = client.send("GET", "/me", Some(&carol), None).await;
		assert!(value["loans"].as_array().unwrap().is_empty());

		let (status, value, _) = client.send("POST", &format!("/books/{id}/checkin"), Some(&bob), None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(value["book"]["checked_out"], false);
		assert_eq!(value["book"]["checked_out_by"], Value::Null);
		assert_eq!(value["book"]["checked_out_at"], Value::Null);

		let (status, _, _) = client.send("POST", &format!("/books/{id}/checkin"), Some(&bob), None).await;
		assert_eq!(status, StatusCode::CONFLICT);

		let (_, value, _) = client.send("GET", &format!("/books/{id}/history"), Some(&carol), None).await;
		let history = value["history"].as_array().unwrap();
		assert_eq!(history.len(), 1);
		assert!(!history[0]["returned_at"].is_null());

		let (status, _, _) = client.send("POST", "/books/424242/checkout", Some(&alice), None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn search_and_recommendations() {
		let client = Client::new().await;
		let admin = client.sign_up("Admin", "admin@library.local").await;
		let member = client.sign_up("Member", "member@library.local").await;
		client
			.add_book(&admin, json!({ "title": "Clean Code", "author": "Robert C. Martin", "genre": "Software Engineering" }))
			.await;
		let borrowed = client
			.add_book(&admin, json!({ "title": "The Pragmatic Programmer", "author": "Andrew Hunt", "genre": "Software Engineering" }))
			.await;
		client.add_book(&admin, json!({ "title": "Atomic Habits", "author": "James Clear" })).await;
		client.send("POST", &format!("/books/{borrowed}/checkout"), Some(&member), None).await;

		let (_, value, _) = client.send("GET", "/books?q=SOFTWARE", Some(&member), None).await;
		assert_eq!(value["books"].as_array().unwrap().len(), 2);
		let (_, value, _) = client.send("GET", "/books", Some(&member), None).await;
		assert_eq!(value["books"][0]["title"], "Atomic Habits");

		let (status, value, _) = client.send("GET", "/recommendations?q=software", Some(&member), None).await;
		assert_eq!(status, StatusCode::OK);
		let recs = value["recommendations"].as_array().unwrap();
		assert_eq!(recs.len(), 3);
		assert_eq!(recs[0]["title"], "Clean Code");
		assert_eq!(recs[0]["score"], 1.5);
		assert_eq!(recs[1]["score"], 1.0);
		assert_eq!(recs[2]["title"], "Atomic Habits");
		assert_eq!(recs[2]["score"], 0.5);
		assert_eq!(
			value["summary"],
			"Found 2 matches for \"software\". 2/3 books are available right now."
		);

		let (_, value, _) = client.send("GET", "/recommendations", Some(&member), None).await;
		assert_eq!(value["recommendations"].as_array().unwrap().len(), 3);
		assert_eq!(value["recommendations"][2]["checked_out"], true);
	}

	#[tokio::test]
	async fn malformed_ids_are_json_not_found() {
		let client = Client::new().await;
		let member = client.sign_up("Member", "member@library.local").await;
		for (method, uri) in [
			("GET", "/books/abc"),
			("POST", "/books/abc/checkout"),
			("POST", "/books/12x/checkin"),
			("GET", "/books/abc/history"),
		] {
			let (status, value, _) = client.send(method, uri, Some(&member), None).await;
			assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
			assert!(value["error"].is_string(), "{method} {uri}: {value}");
		}
	}

	#[tokio::test]
	async fn empty_query_recommends_available_books_first() {
		let client = Client::new().await;
		let admin = client.sign_up("Admin", "admin@library.local").await;
		let member = client.sign_up("Member", "member@library.local").await;
		let aardvark = client.add_book(&admin, json!({ "title": "Aardvark Anatomy", "author": "A" })).await;
		client.add_book(&admin, json!({ "title": "Zebra Zoology", "author": "Z" })).await;
		client.send("POST", &format!("/books/{aardvark}/checkout"), Some(&member), None).await;

		let (status, value, _) = client.send("GET", "/recommendations", Some(&member), None).await;
		assert_eq!(status, StatusCode::OK);
		let recs = value["recommendations"].as_array().unwrap();
		assert_eq!(recs[0]["title"], "Zebra Zoology");
		assert_eq!(recs[0]["score"], 0.5);
		assert_eq!(recs[1]["id"], aardvark);
		assert_eq!(recs[1]["checked_out"], true);
		assert_eq!(recs[1]["score"], 0.0);
	}

	#[tokio::test]
	async fn registration_errors() {
		let client = Client::new().await;
		client.sign_up("Member", "member@library.local").await;
		let (status, _, _) = client
			.send(
				"POST",
				"/register",
				None,
				Some(json!({ "name": "Again", "email": "member@library.local", "password": "Secret123!" })),
			)
			.await;
		assert_eq!(status, StatusCode::CONFLICT);
		let (status, _, _) = client
			.send("POST", "/register", None, Some(json!({ "name": "X", "email": "x@y.io", "password": "short" })))
			.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		let (status, _, _) = client
			.send("POST", "/login", None, Some(json!({ "email": "member@library.local", "password": "wrong-pass" })))
			.await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn logout_ends_the_session() {
		let client = Client::new().await;
		let member = client.sign_up("Member", "member@library.local").await;
		let (status, _, _) = client.send("GET", "/me", Some(&member), None).await;
		assert_eq!(status, StatusCode::OK);
		client.send("POST", "/logout", Some(&member), None).await;
		let (status, _, _) = client.send("GET", "/me", Some(&member), None).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}
}
