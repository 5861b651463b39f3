//! Route table: (method, normalized path) → dispatch target.
//!
//! Paths are matched case-insensitively and without a trailing slash.
//! Paths keep their registered spelling for logs and the discovery document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::dispatch::DispatchHandler;
use crate::error::{ListenerError, ListenerResult};

/// Discovery path the sidecar polls for topic subscriptions.
pub const SUBSCRIBE_PATH: &str = "/dapr/subscribe";

/// Identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// What a matched route does.
#[derive(Clone)]
pub enum RouteAction {
    /// Convert the body and invoke a function.
    Dispatch(Arc<DispatchHandler>),
    /// Answer 200 with an empty body (binding capability probe).
    Probe,
}

impl fmt::Debug for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteAction::Dispatch(handler) => {
                f.debug_tuple("Dispatch").field(&handler.function_name()).finish()
            }
            RouteAction::Probe => f.write_str("Probe"),
        }
    }
}

/// One route contributed by a listener.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub action: RouteAction,
}

impl Route {
    pub fn dispatch(method: Method, path: impl Into<String>, handler: Arc<DispatchHandler>) -> Self {
        Self {
            method,
            path: path.into(),
            action: RouteAction::Dispatch(handler),
        }
    }

    pub fn probe(path: impl Into<String>) -> Self {
        Self {
            method: Method::OPTIONS,
            path: path.into(),
            action: RouteAction::Probe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: Method,
    path: String,
}

impl RouteKey {
    fn new(method: &Method, path: &str) -> Self {
        Self {
            method: method.clone(),
            path: normalize_path(path),
        }
    }
}

#[derive(Debug)]
struct RouteEntry {
    listener: ListenerId,
    path: String,
    action: RouteAction,
}

/// Result of matching a request against the table.
#[derive(Debug)]
pub enum RouteMatch {
    Found(RouteAction),
    /// The path exists, but not for this method.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// Routes of all registered listeners.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install all routes of one listener, or none of them.
    ///
    /// Fails if any route collides with an installed route, with another
    /// route in the same batch, or with the discovery path.
    pub fn insert(&mut self, listener: ListenerId, routes: &[Route]) -> ListenerResult<()> {
        let mut keys = Vec::with_capacity(routes.len());
        for route in routes {
            let key = RouteKey::new(&route.method, &route.path);
            if key.path == SUBSCRIBE_PATH || self.routes.contains_key(&key) || keys.contains(&key) {
                return Err(ListenerError::DuplicateRoute {
                    method: route.method.clone(),
                    path: route.path.clone(),
                });
            }
            keys.push(key);
        }

        for (key, route) in keys.into_iter().zip(routes) {
            debug!(%listener, method = %route.method, path = %route.path, "installed route");
            self.routes.insert(
                key,
                RouteEntry {
                    listener,
                    path: route.path.clone(),
                    action: route.action.clone(),
                },
            );
        }
        Ok(())
    }

    /// Remove every route owned by `listener`. Returns how many were removed.
    pub fn remove_listener(&mut self, listener: ListenerId) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, entry| entry.listener != listener);
        before - self.routes.len()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let key = RouteKey::new(method, path);
        if let Some(entry) = self.routes.get(&key) {
            return RouteMatch::Found(entry.action.clone());
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(k, _)| k.path == key.path)
            .map(|(k, _)| k.method.clone())
            .collect();
        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            RouteMatch::MethodNotAllowed(allowed)
        }
    }

    /// Installed routes as (method, display path), sorted.
    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|(k, entry)| (k.method.clone(), entry.path.clone()))
            .collect();
        routes.sort_by(|a, b| (a.1.as_str(), a.0.as_str()).cmp(&(b.1.as_str(), b.0.as_str())));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Leading `/`, no trailing `/`, lowercase.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    if !trimmed.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(&trimmed.to_ascii_lowercase());
    normalized
}
