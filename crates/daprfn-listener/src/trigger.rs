//! Trigger factories: turn a function declaration into routes on the
//! shared listener.
//!
//! | Trigger | Routes |
//! |---|---|
//! | topic | `POST {route}` (route defaults to the topic name) |
//! | binding | `POST /{name}` and `OPTIONS /{name}` |
//! | service invocation | `POST /{method}` |
//!
//! Names default to the function name. Every name may be written as
//! `%SETTING%` to resolve it from settings.

use std::fmt;
use std::sync::Arc;

use http::Method;
use serde_json::Value;
use tracing::info;

use daprfn_core::{Settings, TopicSubscription};

use crate::dispatch::DispatchHandler;
use crate::error::{ListenerError, ListenerResult};
use crate::function::Function;
use crate::listener::{DaprServiceListener, RegisteredListener};
use crate::route::{ListenerId, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Topic,
    Binding,
    ServiceInvocation,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Topic => "topic",
            TriggerKind::Binding => "binding",
            TriggerKind::ServiceInvocation => "service invocation",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trigger declaration, before it is bound to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Topic {
        pubsub_name: String,
        topic: String,
        route: Option<String>,
    },
    Binding {
        name: Option<String>,
    },
    ServiceInvocation {
        method: Option<String>,
    },
}

impl Trigger {
    pub fn topic(pubsub_name: impl Into<String>, topic: impl Into<String>) -> Self {
        Trigger::Topic {
            pubsub_name: pubsub_name.into(),
            topic: topic.into(),
            route: None,
        }
    }

    pub fn binding() -> Self {
        Trigger::Binding { name: None }
    }

    pub fn service_invocation() -> Self {
        Trigger::ServiceInvocation { method: None }
    }

    /// Builder method: explicit route for a topic trigger.
    pub fn with_route(mut self, new_route: impl Into<String>) -> Self {
        if let Trigger::Topic { route, .. } = &mut self {
            *route = Some(new_route.into());
        }
        self
    }

    /// Builder method: explicit binding or method name.
    pub fn with_name(mut self, new_name: impl Into<String>) -> Self {
        match &mut self {
            Trigger::Binding { name } => *name = Some(new_name.into()),
            Trigger::ServiceInvocation { method } => *method = Some(new_name.into()),
            Trigger::Topic { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Topic { .. } => TriggerKind::Topic,
            Trigger::Binding { .. } => TriggerKind::Binding,
            Trigger::ServiceInvocation { .. } => TriggerKind::ServiceInvocation,
        }
    }

    /// Register `function` on `listener` under this trigger's routes.
    pub fn bind(
        &self,
        function: Function,
        listener: &DaprServiceListener,
        settings: &Settings,
    ) -> ListenerResult<TriggerHandle> {
        let kind = self.kind();
        let function_name = function.name().to_string();

        let (path, registration) = match self {
            Trigger::Topic {
                pubsub_name,
                topic,
                route,
            } => {
                let pubsub_name = resolve_required(settings, pubsub_name, "pubsub name")?;
                let topic = resolve_required(settings, topic, "topic")?;
                let route = match route {
                    Some(route) => resolve_required(settings, route, "route")?,
                    None => topic.clone(),
                };
                let path = leading_slash(&route);

                let handler = DispatchHandler::new(function, kind)
                    .with_binding_value("pubsubname", Value::String(pubsub_name.clone()))
                    .with_binding_value("topic", Value::String(topic.clone()));
                let registration = RegisteredListener::new(kind, &function_name)
                    .with_route(Route::dispatch(Method::POST, &path, Arc::new(handler)))
                    .with_subscription(TopicSubscription::new(pubsub_name, topic, &path));
                (path, registration)
            }
            Trigger::Binding { name } => {
                let name = resolve_name(settings, name.as_deref(), &function_name)?;
                let path = leading_slash(&name);
                let handler = DispatchHandler::new(function, kind);
                let registration = RegisteredListener::new(kind, &function_name)
                    .with_route(Route::dispatch(Method::POST, &path, Arc::new(handler)))
                    .with_route(Route::probe(&path));
                (path, registration)
            }
            Trigger::ServiceInvocation { method } => {
                let method = resolve_name(settings, method.as_deref(), &function_name)?;
                let path = leading_slash(&method);
                let handler = DispatchHandler::new(function, kind);
                let registration = RegisteredListener::new(kind, &function_name)
                    .with_route(Route::dispatch(Method::POST, &path, Arc::new(handler)));
                (path, registration)
            }
        };

        let id = listener.add_listener(registration)?;
        info!(function = %function_name, trigger = %kind, %path, "bound trigger");

        Ok(TriggerHandle {
            listener: listener.clone(),
            id,
            kind,
            path,
        })
    }
}

/// A bound trigger. Starting it ensures the shared server runs; stopping
/// it removes its routes and stops the server if it was the last one.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    listener: DaprServiceListener,
    id: ListenerId,
    kind: TriggerKind,
    path: String,
}

impl TriggerHandle {
    pub async fn start(&self) -> ListenerResult<()> {
        self.listener.ensure_started().await
    }

    pub async fn stop(&self) -> ListenerResult<()> {
        self.listener.deregister(self.id).await
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn resolve_required(settings: &Settings, raw: &str, what: &str) -> ListenerResult<String> {
    let resolved = settings.resolve(raw.trim());
    if resolved.trim().is_empty() {
        return Err(ListenerError::InvalidTrigger(format!("{what} must not be empty")));
    }
    Ok(resolved)
}

/// Explicit name if given, else the function name.
fn resolve_name(settings: &Settings, explicit: Option<&str>, function: &str) -> ListenerResult<String> {
    match explicit {
        Some(name) if !name.trim().is_empty() => resolve_required(settings, name, "trigger name"),
        _ => resolve_required(settings, function, "function name"),
    }
}

fn leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
