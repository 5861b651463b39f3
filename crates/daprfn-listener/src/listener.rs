//! Listener lifecycle: one embedded HTTP server shared by every trigger.
//!
//! Triggers register before the first start. The server starts on the
//! first [`DaprServiceListener::ensure_started`] and stops when the last
//! listener is deregistered. Start and stop transitions are serialized
//! through a single async mutex; the [`ServerState`] word is only written
//! by compare-and-swap inside those transitions.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::Method;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use daprfn_client::DaprClient;
use daprfn_core::{DaprConfig, TopicSubscription};

use crate::error::{ListenerError, ListenerResult};
use crate::route::{ListenerId, Route};
use crate::server::{Shared, build_router};
use crate::sidecar_check;
use crate::trigger::TriggerKind;

/// How long a stop waits for in-flight requests before aborting the server.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// State of the embedded server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routes one trigger contributes, plus its topic subscription.
#[derive(Debug, Clone)]
pub struct RegisteredListener {
    kind: TriggerKind,
    function: String,
    routes: Vec<Route>,
    subscription: Option<TopicSubscription>,
}

impl RegisteredListener {
    pub fn new(kind: TriggerKind, function: impl Into<String>) -> Self {
        Self {
            kind,
            function: function.into(),
            routes: Vec::new(),
            subscription: None,
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_subscription(mut self, subscription: TopicSubscription) -> Self {
        self.subscription = Some(subscription);
        self
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn subscription(&self) -> Option<&TopicSubscription> {
        self.subscription.as_ref()
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

struct Inner {
    config: DaprConfig,
    shared: Arc<Shared>,
    listeners: Mutex<BTreeMap<ListenerId, RegisteredListener>>,
    state: AtomicU8,
    lifecycle: tokio::sync::Mutex<Option<RunningServer>>,
    next_id: AtomicU64,
    sidecar: Option<DaprClient>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(server) = self.lifecycle.get_mut().take() {
            let _ = server.shutdown.send(true);
        }
    }
}

/// Owns the callback listener and the routes of all triggers.
///
/// Cheap to clone; clones share one server.
#[derive(Clone)]
pub struct DaprServiceListener {
    inner: Arc<Inner>,
}

impl DaprServiceListener {
    /// Listener without a sidecar client; the post-start configuration
    /// check is skipped.
    pub fn new(config: DaprConfig) -> Self {
        Self::build(config, None)
    }

    /// Listener that checks the sidecar configuration after each start
    /// (unless disabled in `config`).
    pub fn new_with_sidecar(config: DaprConfig, client: DaprClient) -> Self {
        Self::build(config, Some(client))
    }

    fn build(config: DaprConfig, sidecar: Option<DaprClient>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                shared: Arc::new(Shared::default()),
                listeners: Mutex::new(BTreeMap::new()),
                state: AtomicU8::new(ServerState::Stopped as u8),
                lifecycle: tokio::sync::Mutex::new(None),
                next_id: AtomicU64::new(1),
                sidecar,
            }),
        }
    }

    pub fn config(&self) -> &DaprConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Address the server is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.lock().await.as_ref().map(|s| s.addr)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Installed routes as (method, path), sorted by path.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.inner
            .shared
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes()
    }

    /// Topic subscriptions as served on the discovery path.
    pub fn subscriptions(&self) -> Vec<TopicSubscription> {
        self.inner.shared.topics.list()
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a listener's routes.
    ///
    /// Fails once the server is starting or running, and on any route
    /// that collides with an installed one. On failure nothing is
    /// installed.
    pub fn add_listener(&self, listener: RegisteredListener) -> ListenerResult<ListenerId> {
        let mut listeners = self.listeners();

        let state = self.state();
        if matches!(state, ServerState::Starting | ServerState::Running) {
            return Err(ListenerError::LateRegistration);
        }

        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .shared
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, &listener.routes)?;

        if let Some(subscription) = &listener.subscription {
            self.inner.shared.topics.register(subscription.clone());
        }

        debug!(
            %id,
            function = %listener.function,
            trigger = %listener.kind,
            routes = listener.routes.len(),
            "added listener"
        );
        listeners.insert(id, listener);
        Ok(id)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the server if it is not running.
    ///
    /// Concurrent callers wait for the first to finish; only one server is
    /// ever bound. With no registered listeners this is a no-op.
    pub async fn ensure_started(&self) -> ListenerResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        let route_count = {
            let listeners = self.listeners();
            if listeners.is_empty() {
                debug!("no listeners registered, not starting server");
                return Ok(());
            }
            self.transition(ServerState::Stopped, ServerState::Starting)?;
            listeners.values().map(|l| l.routes.len()).sum::<usize>()
        };

        let addr = self.inner.config.app_addr();
        let tcp = match TcpListener::bind(addr).await {
            Ok(tcp) => tcp,
            Err(source) => {
                self.inner.state.store(ServerState::Stopped as u8, Ordering::Release);
                error!(%addr, error = %source, "failed to bind Dapr callback listener");
                return Err(ListenerError::Bind { addr, source });
            }
        };
        let local_addr = match tcp.local_addr() {
            Ok(local) => local,
            Err(source) => {
                self.inner.state.store(ServerState::Stopped as u8, Ordering::Release);
                return Err(ListenerError::Bind { addr, source });
            }
        };

        let router = build_router(self.inner.shared.clone());
        let (shutdown, mut signal) = watch::channel(false);
        let task = tokio::spawn(async move {
            axum::serve(tcp, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.wait_for(|stop| *stop).await;
                })
                .await
        });

        *lifecycle = Some(RunningServer {
            addr: local_addr,
            shutdown,
            task,
        });
        self.transition(ServerState::Starting, ServerState::Running)?;
        info!(addr = %local_addr, routes = route_count, "Dapr callback listener started");

        if let Some(client) = &self.inner.sidecar {
            if self.inner.config.sidecar_metadata_check {
                let client = client.clone();
                tokio::spawn(async move {
                    sidecar_check::check_sidecar_config(&client, local_addr).await;
                });
            }
        }

        Ok(())
    }

    /// Remove a listener and its routes. Stops the server when the last
    /// listener goes away. Unknown ids are ignored.
    pub async fn deregister(&self, id: ListenerId) -> ListenerResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        let remaining = {
            let mut listeners = self.listeners();
            let Some(listener) = listeners.remove(&id) else {
                debug!(%id, "listener already deregistered");
                return Ok(());
            };

            self.inner
                .shared
                .routes
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove_listener(id);

            if let Some(subscription) = &listener.subscription {
                let shared_by_other = listeners
                    .values()
                    .any(|l| l.subscription.as_ref() == Some(subscription));
                if !shared_by_other {
                    self.inner.shared.topics.remove(subscription);
                }
            }

            debug!(%id, function = %listener.function, "removed listener");
            listeners.len()
        };

        if remaining > 0 {
            return Ok(());
        }
        let Some(server) = lifecycle.take() else {
            return Ok(());
        };

        self.transition(ServerState::Running, ServerState::Stopping)?;
        info!(addr = %server.addr, "stopping Dapr callback listener");
        let _ = server.shutdown.send(true);

        let abort = server.task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, server.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Dapr callback listener exited with error"),
            Ok(Err(e)) => warn!(error = %e, "Dapr callback listener task failed"),
            Err(_) => {
                warn!(grace = ?SHUTDOWN_GRACE, "in-flight requests did not finish, aborting server");
                abort.abort();
            }
        }

        self.transition(ServerState::Stopping, ServerState::Stopped)?;
        info!(addr = %server.addr, "Dapr callback listener stopped");
        Ok(())
    }

    fn transition(&self, from: ServerState, to: ServerState) -> ListenerResult<()> {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|found| ListenerError::StateConflict {
                expected: from.as_str(),
                found: ServerState::from_u8(found).as_str(),
            })
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<ListenerId, RegisteredListener>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DaprServiceListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaprServiceListener")
            .field("app_addr", &self.inner.config.app_addr())
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
