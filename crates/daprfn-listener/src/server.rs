//! HTTP surface of the callback listener.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/dapr/subscribe` | Topic subscriptions as a JSON array |
//! | POST | `/{route}` | Dispatch to the trigger owning the route |
//! | OPTIONS | `/{binding}` | Binding capability probe, 200 with empty body |

use std::sync::{Arc, PoisonError, RwLock};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::debug;

use daprfn_core::TopicSubscription;

use crate::registry::TopicRegistry;
use crate::route::{RouteAction, RouteMatch, RouteTable, SUBSCRIBE_PATH, normalize_path};

/// State shared between the lifecycle manager and request handlers.
#[derive(Debug, Default)]
pub struct Shared {
    pub routes: RwLock<RouteTable>,
    pub topics: TopicRegistry,
}

impl Shared {
    fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(method, path)
    }
}

/// Build the listener router over the shared route table.
pub fn build_router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route(SUBSCRIBE_PATH, get(list_subscriptions))
        .fallback(route_request)
        .with_state(shared)
}

/// GET /dapr/subscribe
pub async fn list_subscriptions(State(shared): State<Arc<Shared>>) -> Json<Vec<TopicSubscription>> {
    Json(shared.topics.list())
}

/// Everything except the exact discovery path.
async fn route_request(State(shared): State<Arc<Shared>>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if normalize_path(&path) == SUBSCRIBE_PATH {
        return if method == Method::GET {
            list_subscriptions(State(shared)).await.into_response()
        } else {
            method_not_allowed(&[Method::GET])
        };
    }

    match shared.lookup(&method, &path) {
        RouteMatch::Found(RouteAction::Dispatch(handler)) => handler.dispatch(request).await,
        RouteMatch::Found(RouteAction::Probe) => StatusCode::OK.into_response(),
        RouteMatch::MethodNotAllowed(allowed) => {
            debug!(%method, path, "method not allowed");
            method_not_allowed(&allowed)
        }
        RouteMatch::NotFound => {
            debug!(%method, path, "no route");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

fn method_not_allowed(allowed: &[Method]) -> Response {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    match HeaderValue::from_str(&allow) {
        Ok(value) => (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, value)]).into_response(),
        Err(_) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
