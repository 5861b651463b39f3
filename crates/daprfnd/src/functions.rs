//! Demo functions and the trigger declarations parsed from the command line.

use std::str::FromStr;

use daprfn_listener::{DestinationShape, Function, InvocationOutput, Trigger};
use tracing::info;

/// `--topic pubsub/topic[=route]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicArg {
    pub pubsub_name: String,
    pub topic: String,
    pub route: Option<String>,
}

impl TopicArg {
    pub fn trigger(&self) -> Trigger {
        let trigger = Trigger::topic(&self.pubsub_name, &self.topic);
        match &self.route {
            Some(route) => trigger.with_route(route),
            None => trigger,
        }
    }

    pub fn function_name(&self) -> String {
        format!("on-{}-{}", self.pubsub_name, self.topic)
    }
}

impl FromStr for TopicArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, route) = match s.split_once('=') {
            Some((target, route)) => (target, Some(route.trim())),
            None => (s, None),
        };
        let (pubsub_name, topic) = target
            .split_once('/')
            .ok_or_else(|| format!("expected PUBSUB/TOPIC[=ROUTE], got `{s}`"))?;

        let pubsub_name = pubsub_name.trim();
        let topic = topic.trim();
        if pubsub_name.is_empty() || topic.is_empty() {
            return Err(format!("pubsub and topic must not be empty in `{s}`"));
        }
        if route.is_some_and(str::is_empty) {
            return Err(format!("route must not be empty in `{s}`"));
        }

        Ok(Self {
            pubsub_name: pubsub_name.to_string(),
            topic: topic.to_string(),
            route: route.map(str::to_string),
        })
    }
}

/// Logs the request and echoes its JSON input back.
pub fn echo(name: impl Into<String>) -> Function {
    Function::new(name, DestinationShape::GenericJson, |ctx| async move {
        info!(
            function = %ctx.function,
            path = %ctx.uri.path(),
            bindings = ctx.binding_data.len(),
            "invoked"
        );
        Ok(ctx.value.as_json().cloned().map(InvocationOutput::Json))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use daprfn_listener::InvocationValue;

    #[test]
    fn parses_topic_with_and_without_route() {
        let arg: TopicArg = "pubsub/orders".parse().unwrap();
        assert_eq!(arg.pubsub_name, "pubsub");
        assert_eq!(arg.topic, "orders");
        assert_eq!(arg.route, None);

        let arg: TopicArg = "pubsub/orders=/orders/created".parse().unwrap();
        assert_eq!(arg.route.as_deref(), Some("/orders/created"));
        assert_eq!(
            arg.trigger(),
            Trigger::topic("pubsub", "orders").with_route("/orders/created")
        );
    }

    #[test]
    fn rejects_malformed_topics() {
        assert!("orders".parse::<TopicArg>().is_err());
        assert!("/orders".parse::<TopicArg>().is_err());
        assert!("pubsub/".parse::<TopicArg>().is_err());
        assert!("pubsub/orders=".parse::<TopicArg>().is_err());
    }

    #[tokio::test]
    async fn echo_returns_input() {
        let output = echo("e")
            .call_with(InvocationValue::Json(json!({"a": 1})))
            .await
            .unwrap();
        match output {
            Some(InvocationOutput::Json(v)) => assert_eq!(v, json!({"a": 1})),
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
