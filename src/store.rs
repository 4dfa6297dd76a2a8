//! The store: shared state plus the dispatchers that feed it.
//!
//! ARCHITECTURE
//! ============
//! Every network dispatcher goes through [`Store::request_and_commit`]: one
//! transport call, one envelope decode, one mutation. The state mutex is
//! only held for the synchronous apply (and the token write that mirrors
//! it), never across an `.await`, so
//! concurrent dispatches interleave freely and commit in completion order.
//!
//! TRADE-OFFS
//! ==========
//! By default the last response to land wins, even if it was issued first.
//! With `fence_stale_responses` each dispatch takes a ticket from a single
//! monotonic counter; a response whose ticket is older than the last one
//! committed to the same slot is dropped with [`StoreError::Superseded`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{StoreConfig, StoreOptions};
use crate::error::StoreError;
use crate::state::{Mutation, Slot, State};
use crate::storage::{FileStorage, TOKEN_STORAGE_KEY, TokenStorage};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::types::{Column, DeletedPost, Envelope, GlobalError, ListData, LoginData, LoginPayload, Post, PostPayload, User};

/// Ticket bookkeeping for response fencing.
#[derive(Debug, Default)]
struct Fence {
    next: u64,
    committed: [u64; Slot::COUNT],
}

struct Inner {
    state: State,
    fence: Fence,
}

/// Client-side store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    options: StoreOptions,
}

impl Store {
    /// Build a store, restoring the token persisted in `storage`.
    ///
    /// A storage read failure is logged and treated as "no token".
    pub fn new(transport: Arc<dyn Transport>, storage: Arc<dyn TokenStorage>, options: StoreOptions) -> Self {
        let token = match storage.get(TOKEN_STORAGE_KEY) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "token restore failed; starting logged out");
                None
            }
        };
        let inner = Inner { state: State::initial(token), fence: Fence::default() };
        Self { inner: Arc::new(Mutex::new(inner)), transport, storage, options }
    }

    /// Build a store backed by the HTTP transport and file storage named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        let transport = HttpTransport::new(&config.base_url, config.timeouts)?;
        let storage = FileStorage::new(config.storage_path.clone());
        Ok(Self::new(Arc::new(transport), Arc::new(storage), config.options))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // READ ACCESS
    // =========================================================================

    /// Clone of the current state.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.lock().state.clone()
    }

    /// Run `f` against the current state without cloning it.
    pub fn with_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.lock().state)
    }

    #[must_use]
    pub fn column_by_id(&self, id: &str) -> Option<Column> {
        self.with_state(|s| s.column_by_id(id).cloned())
    }

    #[must_use]
    pub fn posts_by_column_id(&self, column_id: &str) -> Vec<Post> {
        self.with_state(|s| s.posts_by_column_id(column_id).into_iter().cloned().collect())
    }

    #[must_use]
    pub fn post_by_id(&self, id: &str) -> Option<Post> {
        self.with_state(|s| s.post_by_id(id).cloned())
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Apply a mutation right now.
    ///
    /// Direct commits always carry the newest ticket, so fencing never drops them.
    pub fn commit(&self, mutation: Mutation) {
        let ticket = self.issue_ticket();
        if let Err(e) = self.commit_at(ticket, mutation) {
            tracing::debug!(error = %e, "direct commit dropped");
        }
    }

    pub fn set_loading(&self, loading: bool) {
        self.commit(Mutation::SetLoading(loading));
    }

    pub fn set_error(&self, error: GlobalError) {
        self.commit(Mutation::SetError(error));
    }

    /// Forget the token (state and durable storage) and reset the user.
    pub fn logout(&self) {
        self.commit(Mutation::Logout);
    }

    fn issue_ticket(&self) -> u64 {
        let mut inner = self.lock();
        inner.fence.next += 1;
        inner.fence.next
    }

    fn commit_at(&self, ticket: u64, mutation: Mutation) -> Result<(), StoreError> {
        let name = mutation.name();
        let persist = match &mutation {
            Mutation::Login(env) => Some(Some(env.data.token.clone())),
            Mutation::Logout => Some(None),
            _ => None,
        };

        {
            let mut inner = self.lock();
            if self.options.fence_stale_responses {
                let slots = mutation.replaced_slots();
                if slots.iter().any(|slot| ticket < inner.fence.committed[slot.index()]) {
                    tracing::debug!(mutation = name, ticket, "stale response dropped");
                    return Err(StoreError::Superseded { mutation: name });
                }
                for slot in slots {
                    inner.fence.committed[slot.index()] = ticket;
                }
            }
            inner.state.apply(mutation);
            // Storage writes stay under the state lock so their order matches commit order.
            if let Some(token) = persist {
                self.persist_token(token.as_deref());
            }
        }
        tracing::debug!(mutation = name, "committed");
        Ok(())
    }

    fn persist_token(&self, token: Option<&str>) {
        let result = match token {
            Some(token) => self.storage.set(TOKEN_STORAGE_KEY, token),
            None => self.storage.remove(TOKEN_STORAGE_KEY),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "token persistence failed; in-memory token still applies");
        }
    }

    // =========================================================================
    // REQUEST AND COMMIT
    // =========================================================================

    /// Issue `request` with the current credentials, decode the envelope,
    /// apply `wrap(envelope)`, and hand the envelope back.
    ///
    /// # Errors
    ///
    /// Transport, status, and decode failures propagate unchanged and commit
    /// nothing. With fencing enabled a stale response yields
    /// [`StoreError::Superseded`].
    pub async fn request_and_commit<T>(
        &self,
        request: ApiRequest,
        wrap: impl FnOnce(Envelope<T>) -> Mutation,
    ) -> Result<Envelope<T>, StoreError>
    where
        T: DeserializeOwned + Clone,
    {
        let (ticket, token) = {
            let mut inner = self.lock();
            inner.fence.next += 1;
            (inner.fence.next, inner.state.token.clone())
        };
        let request = request.with_bearer(&token);
        tracing::debug!(method = %request.method, path = %request.path, ticket, "api request");

        let body = self.transport.send(request).await?;
        let envelope: Envelope<T> = serde_json::from_value(body).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.commit_at(ticket, wrap(envelope.clone()))?;
        Ok(envelope)
    }

    // =========================================================================
    // DISPATCHERS
    // =========================================================================

    /// `GET /columns`: replace the column list.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn fetch_columns(&self) -> Result<Envelope<ListData<Column>>, StoreError> {
        self.request_and_commit(ApiRequest::get("/columns"), Mutation::FetchColumns)
            .await
    }

    /// `GET /columns/{cid}`: reduce the column list to that column.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn fetch_column(&self, cid: &str) -> Result<Envelope<Column>, StoreError> {
        self.request_and_commit(ApiRequest::get(format!("/columns/{cid}")), Mutation::FetchColumn)
            .await
    }

    /// `GET /columns/{cid}/posts`: replace the post list.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn fetch_posts(&self, cid: &str) -> Result<Envelope<ListData<Post>>, StoreError> {
        self.request_and_commit(ApiRequest::get(format!("/columns/{cid}/posts")), Mutation::FetchPosts)
            .await
    }

    /// `GET /posts/{id}`: reduce the post list to that post.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn fetch_post(&self, id: &str) -> Result<Envelope<Post>, StoreError> {
        self.request_and_commit(ApiRequest::get(format!("/posts/{id}")), Mutation::FetchPost)
            .await
    }

    /// `POST /user/login`: store the returned token.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn login(&self, credentials: &LoginPayload) -> Result<Envelope<LoginData>, StoreError> {
        let body = to_body(credentials)?;
        self.request_and_commit(ApiRequest::post("/user/login", body), Mutation::Login)
            .await
    }

    /// `POST /posts`: append the created post.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn create_post(&self, payload: &PostPayload) -> Result<Envelope<Post>, StoreError> {
        let body = to_body(payload)?;
        self.request_and_commit(ApiRequest::post("/posts", body), Mutation::CreatePost)
            .await
    }

    /// `GET /user/current`: mark the user logged in with the returned profile.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn fetch_current_user(&self) -> Result<Envelope<User>, StoreError> {
        self.request_and_commit(ApiRequest::get("/user/current"), Mutation::FetchCurrentUser)
            .await
    }

    /// `PATCH /posts/{id}`: replace the matching cached post.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn update_post(&self, id: &str, payload: &PostPayload) -> Result<Envelope<Post>, StoreError> {
        let body = to_body(payload)?;
        self.request_and_commit(ApiRequest::patch(format!("/posts/{id}"), body), Mutation::UpdatePost)
            .await
    }

    /// `DELETE /posts/{id}`: drop the matching cached post.
    ///
    /// # Errors
    ///
    /// See [`Store::request_and_commit`].
    pub async fn delete_post(&self, id: &str) -> Result<Envelope<DeletedPost>, StoreError> {
        self.request_and_commit(ApiRequest::delete(format!("/posts/{id}")), Mutation::DeletePost)
            .await
    }

    /// Log in, then fetch the current user.
    ///
    /// A failed login skips the profile fetch. A failed profile fetch leaves
    /// the new token committed.
    ///
    /// # Errors
    ///
    /// The first failure of either step.
    pub async fn login_and_fetch(&self, credentials: &LoginPayload) -> Result<Envelope<User>, StoreError> {
        self.login(credentials).await?;
        self.fetch_current_user().await
    }

    // =========================================================================
    // TRACKED DISPATCH
    // =========================================================================

    /// Await `dispatch` with the loading flag raised and the error cleared;
    /// on failure record it as the global error.
    ///
    /// # Errors
    ///
    /// Returns the dispatch error unchanged.
    pub async fn tracked<T, F>(&self, dispatch: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.set_error(GlobalError::default());
        self.set_loading(true);
        let result = dispatch.await;
        self.set_loading(false);
        if let Err(e) = &result {
            self.set_error(GlobalError::raised(e.user_message()));
        }
        result
    }
}

fn to_body(payload: &impl Serialize) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(payload).map_err(|e| StoreError::Decode(format!("request body: {e}")))
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
