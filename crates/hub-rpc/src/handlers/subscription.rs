//! Topic subscription handlers. Socket transport only.

use hub_core::{HubError, Topic};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::HandlerContext;
use crate::errors::RpcError;
use crate::registry::{NoParams, RegistryBuilder};

/// Subscribe method name.
pub const SUBSCRIBE: &str = "subscribe";
/// Unsubscribe method name.
pub const UNSUBSCRIBE: &str = "unsubscribe";
/// List-subscriptions method name.
pub const SUBSCRIPTIONS: &str = "subscriptions";

/// Methods that mutate the subscription index and are refused over HTTP
/// before any lookup.
pub fn is_subscription_method(method: &str) -> bool {
    matches!(method, SUBSCRIBE | UNSUBSCRIBE)
}

/// `subscribe` / `unsubscribe` params.
#[derive(Clone, Debug, Deserialize)]
pub struct TopicParams {
    /// Topic wire name.
    pub event: String,
}

/// Generic acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Always `true`.
    pub success: bool,
}

/// `subscriptions` result.
#[derive(Clone, Debug, Serialize)]
pub struct SubscriptionList {
    /// Subscribed topics, sorted.
    pub events: Vec<Topic>,
}

fn map_hub_error(err: HubError) -> RpcError {
    match err {
        HubError::UnknownTopic { .. } => RpcError::invalid_field("event", err.to_string()),
        HubError::UnknownConnection { .. } => RpcError::internal(err.to_string()),
    }
}

/// Add the calling connection to a topic.
pub async fn subscribe(ctx: HandlerContext, params: TopicParams) -> Result<Ack, RpcError> {
    let conn = ctx.require_connection()?;
    let added = conn.subscribe(&params.event).map_err(map_hub_error)?;
    debug!(conn_id = %conn.id(), event = %params.event, added, "subscribed");
    Ok(Ack { success: true })
}

/// Remove the calling connection from a topic. Idempotent.
pub async fn unsubscribe(ctx: HandlerContext, params: TopicParams) -> Result<Ack, RpcError> {
    let conn = ctx.require_connection()?;
    let removed = conn.unsubscribe(&params.event).map_err(map_hub_error)?;
    debug!(conn_id = %conn.id(), event = %params.event, removed, "unsubscribed");
    Ok(Ack { success: true })
}

/// Topics the calling connection is subscribed to.
pub async fn subscriptions(
    ctx: HandlerContext,
    _params: NoParams,
) -> Result<SubscriptionList, RpcError> {
    let conn = ctx.require_connection()?;
    Ok(SubscriptionList {
        events: conn.subscriptions(),
    })
}

pub(super) fn register(builder: &mut RegistryBuilder) {
    let _ = builder.method(
        SUBSCRIBE,
        "Subscribe this connection to an event topic. WebSocket only.",
        subscribe,
    );
    let _ = builder.method(
        UNSUBSCRIBE,
        "Unsubscribe this connection from an event topic. WebSocket only.",
        unsubscribe,
    );
    let _ = builder.method(
        SUBSCRIPTIONS,
        "List the topics this connection is subscribed to. WebSocket only.",
        subscriptions,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors;
    use crate::handlers::test_helpers::{http_ctx, make_services, socket_ctx};

    fn params(event: &str) -> TopicParams {
        TopicParams {
            event: event.into(),
        }
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers() {
        let services = make_services();
        let (ctx, mut rx) = socket_ctx(&services, SUBSCRIBE);
        let ack = subscribe(ctx, params("data.created")).await.unwrap();
        assert!(ack.success);

        let report = services
            .broadcaster
            .publish(Topic::DataCreated, &serde_json::json!({"id": "r1"}));
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unknown_topic_is_invalid_params() {
        let services = make_services();
        let (ctx, _rx) = socket_ctx(&services, SUBSCRIBE);
        let err = subscribe(ctx, params("data.exploded")).await.unwrap_err();
        assert_eq!(err.code(), errors::INVALID_PARAMS);
        let body = err.to_error_body();
        assert!(body.errors.unwrap()["event"].contains("data.exploded"));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let services = make_services();
        let (ctx, _rx) = socket_ctx(&services, UNSUBSCRIBE);
        let conn_id = ctx.connection().unwrap().id().clone();
        let _ = subscribe(ctx.clone(), params("data.deleted")).await.unwrap();

        assert!(unsubscribe(ctx.clone(), params("data.deleted")).await.unwrap().success);
        assert!(unsubscribe(ctx, params("data.deleted")).await.unwrap().success);
        assert!(services.registry.subscriptions(&conn_id).is_empty());
    }

    #[tokio::test]
    async fn subscriptions_lists_index_view() {
        let services = make_services();
        let (ctx, _rx) = socket_ctx(&services, SUBSCRIPTIONS);
        let _ = subscribe(ctx.clone(), params("system.notice")).await.unwrap();
        let _ = subscribe(ctx.clone(), params("data.created")).await.unwrap();

        let list = subscriptions(ctx, NoParams).await.unwrap();
        assert_eq!(list.events, vec![Topic::DataCreated, Topic::SystemNotice]);
        let v = serde_json::to_value(&list).unwrap();
        assert_eq!(v, serde_json::json!({"events": ["data.created", "system.notice"]}));
    }

    #[tokio::test]
    async fn http_context_is_rejected() {
        let err = subscriptions(http_ctx(SUBSCRIPTIONS), NoParams).await.unwrap_err();
        assert_eq!(err.code(), errors::TRANSPORT_NOT_SUPPORTED);
        let err = subscribe(http_ctx(SUBSCRIBE), params("data.created")).await.unwrap_err();
        assert_eq!(err.code(), errors::TRANSPORT_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn removed_connection_cannot_subscribe() {
        let services = make_services();
        let (ctx, _rx) = socket_ctx(&services, SUBSCRIBE);
        let _ = services.registry.remove(ctx.connection().unwrap().id());
        let err = subscribe(ctx, params("data.created")).await.unwrap_err();
        assert_eq!(err.code(), errors::INTERNAL_ERROR);
    }

    #[test]
    fn reserved_methods() {
        assert!(is_subscription_method("subscribe"));
        assert!(is_subscription_method("unsubscribe"));
        assert!(!is_subscription_method("subscriptions"));
        assert!(!is_subscription_method("ping"));
    }
}
