//! Wire DTOs for the blogging backend.
//!
//! DESIGN
//! ======
//! Field names mirror the backend JSON (`_id`, camelCase) through serde
//! renames so envelopes decode without any hand mapping. Optional fields
//! are skipped on serialize so request payloads stay minimal.

use serde::{Deserialize, Serialize};

// =============================================================================
// ENVELOPE
// =============================================================================

/// Standard response wrapper: `{ code, msg, data }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wrap `data` in a success envelope (`code = 0`).
    pub fn ok(data: T) -> Self {
        Self { code: 0, msg: "ok".to_owned(), data }
    }
}

/// Payload of list endpoints: items under `list`, plus paging metadata
/// when the backend sends it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListData<T> {
    pub list: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, rename = "pageSize", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,
    #[serde(default, rename = "currentPage", skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u64>,
}

impl<T> ListData<T> {
    pub fn new(list: Vec<T>) -> Self {
        Self { list, count: None, page_size: None, current_page: None }
    }
}

/// Payload of `POST /user/login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub token: String,
}

// =============================================================================
// ENTITIES
// =============================================================================

/// An uploaded image, always embedded in another entity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Resized variant URL, when the backend provides one.
    #[serde(default, rename = "fitUrl", skip_serializing_if = "Option::is_none")]
    pub fit_url: Option<String>,
}

/// The current user. `is_login` is client-side only; the backend never sends it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, rename = "isLogin")]
    pub is_login: bool,
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "nickName", skip_serializing_if = "Option::is_none")]
    pub nick_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Id of the column owned by this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Image>,
}

/// Post image: either the embedded image or just its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Id(String),
    Inline(Image),
}

/// Post author: either a user id or the embedded user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorRef {
    Id(String),
    User(Box<User>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default, rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default, rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Id of the owning column.
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorRef>,
    /// `true` when `content` is HTML rather than markdown.
    #[serde(default, rename = "isHTML", skip_serializing_if = "Option::is_none")]
    pub is_html: Option<bool>,
}

impl Post {
    /// Whether this post carries the server id `id`. Posts without an id never match.
    #[must_use]
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }
}

/// Payload of `DELETE /posts/{id}`. Only the id is read; any other post
/// fields the backend echoes back are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedPost {
    #[serde(rename = "_id")]
    pub id: String,
}

// =============================================================================
// GLOBAL ERROR
// =============================================================================

/// The single global error value shown by the UI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalError {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GlobalError {
    /// An active error carrying `message`.
    pub fn raised(message: impl Into<String>) -> Self {
        Self { status: true, message: Some(message.into()) }
    }
}

// =============================================================================
// REQUEST PAYLOADS
// =============================================================================

/// Body of `POST /user/login`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

/// Body of `POST /posts` and `PATCH /posts/{id}`. Absent fields are omitted,
/// so the same type serves full creates and partial updates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Id of a previously uploaded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
