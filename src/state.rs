//! Shared client state and the mutations that change it.
//!
//! DESIGN
//! ======
//! `State` is a plain record; every change goes through [`State::apply`]
//! with a [`Mutation`]. Applying is synchronous and total: no I/O, no
//! failure path. Persisting the token is the store's job, not the state's.

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

use serde::Serialize;

use crate::types::{Column, DeletedPost, Envelope, GlobalError, ListData, LoginData, Post, User};

// =============================================================================
// MUTATION
// =============================================================================

/// A single state change, carrying the response envelope it was built from.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Login(Envelope<LoginData>),
    FetchColumns(Envelope<ListData<Column>>),
    FetchColumn(Envelope<Column>),
    FetchPosts(Envelope<ListData<Post>>),
    FetchPost(Envelope<Post>),
    SetLoading(bool),
    FetchCurrentUser(Envelope<User>),
    SetError(GlobalError),
    Logout,
    UpdatePost(Envelope<Post>),
    CreatePost(Envelope<Post>),
    DeletePost(Envelope<DeletedPost>),
}

/// The part of [`State`] a replacing mutation overwrites wholesale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Token,
    Columns,
    Posts,
    User,
}

impl Slot {
    pub const COUNT: usize = 4;

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Token => 0,
            Self::Columns => 1,
            Self::Posts => 2,
            Self::User => 3,
        }
    }
}

impl Mutation {
    /// Stable name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::FetchColumns(_) => "fetchColumns",
            Self::FetchColumn(_) => "fetchColumn",
            Self::FetchPosts(_) => "fetchPosts",
            Self::FetchPost(_) => "fetchPost",
            Self::SetLoading(_) => "setLoading",
            Self::FetchCurrentUser(_) => "fetchCurrentUser",
            Self::SetError(_) => "setError",
            Self::Logout => "logout",
            Self::UpdatePost(_) => "updatePost",
            Self::CreatePost(_) => "createPost",
            Self::DeletePost(_) => "deletePost",
        }
    }

    /// Slots this mutation replaces wholesale.
    ///
    /// Incremental post edits (update/create/delete) and the flag setters
    /// return nothing: they never discard another response's data.
    #[must_use]
    pub fn replaced_slots(&self) -> &'static [Slot] {
        match self {
            Self::Login(_) => &[Slot::Token],
            Self::Logout => &[Slot::Token, Slot::User],
            Self::FetchColumns(_) | Self::FetchColumn(_) => &[Slot::Columns],
            Self::FetchPosts(_) | Self::FetchPost(_) => &[Slot::Posts],
            Self::FetchCurrentUser(_) => &[Slot::User],
            Self::SetLoading(_) | Self::SetError(_) | Self::UpdatePost(_) | Self::CreatePost(_) | Self::DeletePost(_) => {
                &[]
            }
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Everything the UI reads: global flags, auth, and the cached collections.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct State {
    pub error: GlobalError,
    /// Bearer token; empty when logged out.
    pub token: String,
    pub loading: bool,
    pub columns: Vec<Column>,
    pub posts: Vec<Post>,
    pub user: User,
}

impl State {
    /// Start-up state: everything empty except a token restored from storage.
    #[must_use]
    pub fn initial(token: Option<String>) -> Self {
        Self { token: token.unwrap_or_default(), ..Self::default() }
    }

    /// Apply one mutation.
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Login(env) => self.token = env.data.token,
            Mutation::FetchColumns(env) => self.columns = env.data.list,
            Mutation::FetchColumn(env) => self.columns = vec![env.data],
            Mutation::FetchPosts(env) => self.posts = env.data.list,
            Mutation::FetchPost(env) => self.posts = vec![env.data],
            Mutation::SetLoading(loading) => self.loading = loading,
            Mutation::FetchCurrentUser(env) => self.user = User { is_login: true, ..env.data },
            Mutation::SetError(error) => self.error = error,
            Mutation::Logout => {
                self.token.clear();
                self.user = User::default();
            }
            Mutation::UpdatePost(env) => {
                let updated = env.data;
                let Some(id) = updated.id.clone() else {
                    return;
                };
                for post in &mut self.posts {
                    if post.has_id(&id) {
                        *post = updated.clone();
                    }
                }
            }
            Mutation::CreatePost(env) => self.posts.push(env.data),
            Mutation::DeletePost(env) => {
                if let Some(index) = self.posts.iter().position(|post| post.has_id(&env.data.id)) {
                    self.posts.remove(index);
                }
            }
        }
    }

    // =========================================================================
    // DERIVERS
    // =========================================================================

    /// First column with `id`.
    #[must_use]
    pub fn column_by_id(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Posts belonging to column `column_id`, in stored order.
    #[must_use]
    pub fn posts_by_column_id(&self, column_id: &str) -> Vec<&Post> {
        self.posts
            .iter()
            .filter(|p| p.column == column_id)
            .collect()
    }

    /// First post with `id`.
    #[must_use]
    pub fn post_by_id(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.has_id(id))
    }
}
