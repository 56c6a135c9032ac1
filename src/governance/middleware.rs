//! Axum glue for the [`Governor`].

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

use crate::governance::Governor;

/// Use with `axum::middleware::from_fn_with_state(governor, governance_middleware)`.
pub async fn governance_middleware(State(governor): State<Arc<Governor>>, request: Request, next: Next) -> Response {
    governor
        .govern(request, move |request| next.run(request))
        .await
}
