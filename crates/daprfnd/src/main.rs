//! daprfnd: Dapr function host.
//!
//! Binds echo functions to the triggers named on the command line and
//! serves the sidecar's callbacks until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! daprfnd serve --app-port 3001 --topic pubsub/orders --binding queue --method status
//! ```

mod functions;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use daprfn_client::DaprClient;
use daprfn_core::{DaprConfig, Settings};
use daprfn_listener::{DaprServiceListener, Trigger, TriggerHandle};

use functions::TopicArg;

#[derive(Parser)]
#[command(name = "daprfnd", about = "Dapr function host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve sidecar callbacks for the declared triggers.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port the callback listener binds (overrides DAPR_APP_PORT).
    #[arg(long)]
    app_port: Option<u16>,

    /// Sidecar HTTP port (overrides DAPR_HTTP_PORT).
    #[arg(long)]
    dapr_http_port: Option<u16>,

    /// Sidecar HTTP host (overrides DAPR_HTTP_HOST).
    #[arg(long)]
    dapr_http_host: Option<String>,

    /// Skip the post-start sidecar configuration check.
    #[arg(long)]
    no_metadata_check: bool,

    /// Topic subscription, as PUBSUB/TOPIC[=ROUTE]. Repeatable.
    #[arg(long = "topic", value_name = "PUBSUB/TOPIC[=ROUTE]")]
    topics: Vec<TopicArg>,

    /// Input binding name. Repeatable.
    #[arg(long = "binding", value_name = "NAME")]
    bindings: Vec<String>,

    /// Service invocation method name. Repeatable.
    #[arg(long = "method", value_name = "NAME")]
    methods: Vec<String>,
}

impl ServeArgs {
    fn config(&self, settings: &Settings) -> DaprConfig {
        let mut config = DaprConfig::from_settings(settings);
        if let Some(port) = self.app_port {
            config.app_port = port;
        }
        if let Some(port) = self.dapr_http_port {
            config.sidecar_http_port = port;
        }
        if let Some(host) = &self.dapr_http_host {
            config.sidecar_host = host.clone();
        }
        if self.no_metadata_check {
            config.sidecar_metadata_check = false;
        }
        config
    }

    fn trigger_count(&self) -> usize {
        self.topics.len() + self.bindings.len() + self.methods.len()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,daprfnd=debug,daprfn=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    if args.trigger_count() == 0 {
        anyhow::bail!("no triggers declared; pass at least one --topic, --binding or --method");
    }

    let settings = Settings::from_env();
    let config = args.config(&settings);
    info!(
        app_addr = %config.app_addr(),
        sidecar = %config.sidecar_http_address(),
        "daprfnd starting"
    );

    let client = DaprClient::from_config(&config);
    let listener = DaprServiceListener::new_with_sidecar(config, client);

    // ── Bind triggers ──────────────────────────────────────────

    let handles = bind_triggers(&args, &listener, &settings)?;

    for handle in &handles {
        handle
            .start()
            .await
            .with_context(|| format!("failed to start trigger {}", handle.path()))?;
    }
    if let Some(addr) = listener.local_addr().await {
        info!(%addr, triggers = handles.len(), "daprfnd ready");
    }

    // ── Shutdown ───────────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    info!("shutdown signal received");

    for handle in &handles {
        handle
            .stop()
            .await
            .with_context(|| format!("failed to stop trigger {}", handle.path()))?;
    }

    info!("daprfnd stopped");
    Ok(())
}

fn bind_triggers(
    args: &ServeArgs,
    listener: &DaprServiceListener,
    settings: &Settings,
) -> anyhow::Result<Vec<TriggerHandle>> {
    let mut handles = Vec::with_capacity(args.trigger_count());

    for topic in &args.topics {
        let handle = topic
            .trigger()
            .bind(functions::echo(topic.function_name()), listener, settings)
            .with_context(|| format!("invalid topic trigger {}/{}", topic.pubsub_name, topic.topic))?;
        handles.push(handle);
    }
    for name in &args.bindings {
        let handle = Trigger::binding()
            .with_name(name)
            .bind(functions::echo(name), listener, settings)
            .with_context(|| format!("invalid binding trigger {name}"))?;
        handles.push(handle);
    }
    for name in &args.methods {
        let handle = Trigger::service_invocation()
            .with_name(name)
            .bind(functions::echo(name), listener, settings)
            .with_context(|| format!("invalid method trigger {name}"))?;
        handles.push(handle);
    }

    Ok(handles)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Serve(args) => args,
        }
    }

    #[test]
    fn flags_override_settings() {
        let args = parse(&[
            "daprfnd",
            "serve",
            "--app-port",
            "4000",
            "--dapr-http-host",
            "sidecar",
            "--no-metadata-check",
        ]);
        let settings = Settings::from_map(HashMap::from([
            ("DAPR_APP_PORT".to_string(), "3999".to_string()),
            ("DAPR_HTTP_PORT".to_string(), "3600".to_string()),
        ]));

        let config = args.config(&settings);
        assert_eq!(config.app_port, 4000);
        assert_eq!(config.sidecar_http_port, 3600);
        assert_eq!(config.sidecar_http_address(), "http://sidecar:3600");
        assert!(!config.sidecar_metadata_check);
    }

    #[test]
    fn repeatable_trigger_flags() {
        let args = parse(&[
            "daprfnd",
            "serve",
            "--topic",
            "pubsub/orders",
            "--topic",
            "pubsub/returns=/r",
            "--binding",
            "queue",
            "--method",
            "status",
        ]);
        assert_eq!(args.topics.len(), 2);
        assert_eq!(args.topics[1].route.as_deref(), Some("/r"));
        assert_eq!(args.trigger_count(), 4);
    }

    #[test]
    fn bad_topic_flag_is_rejected() {
        assert!(Cli::try_parse_from(["daprfnd", "serve", "--topic", "orders"]).is_err());
    }

    #[test]
    fn binds_every_declared_trigger() {
        let args = parse(&[
            "daprfnd", "serve", "--topic", "pubsub/orders", "--binding", "queue", "--method", "status",
        ]);
        let settings = Settings::from_map(HashMap::new());
        let listener = DaprServiceListener::new(DaprConfig::default().with_app_port(0));

        let handles = bind_triggers(&args, &listener, &settings).unwrap();
        let paths: Vec<_> = handles.iter().map(|h| h.path().to_string()).collect();
        assert_eq!(paths, ["/orders", "/queue", "/status"]);
        assert_eq!(listener.subscriptions().len(), 1);
    }
}
