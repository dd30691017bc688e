//! System handlers: ping, system.info, system.notify.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use hub_core::{Broadcaster, ConnectionRegistry, Topic};
use serde::{Deserialize, Serialize};

use crate::context::HandlerContext;
use crate::errors::RpcError;
use crate::handlers::HubServices;
use crate::registry::{HttpVerb, NoParams, RegistryBuilder};

/// `ping` result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pong {
    /// Always `"pong"`.
    pub message: &'static str,
    /// Always `"success"`.
    pub status: &'static str,
}

/// `system.info` result.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    /// Crate version.
    pub version: &'static str,
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Live socket connections.
    pub connections: usize,
    /// Subscriber count per topic.
    pub topics: BTreeMap<&'static str, usize>,
}

/// Severity of a `system.notice` event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Informational.
    #[default]
    Info,
    /// Something operators should look at.
    Warning,
    /// Something is broken.
    Error,
}

/// `system.notify` params.
#[derive(Clone, Debug, Deserialize)]
pub struct NotifyParams {
    /// Notice text.
    pub message: String,
    /// Severity, `info` if omitted.
    #[serde(default)]
    pub level: NoticeLevel,
}

/// Payload of a `system.notice` event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    /// Notice text.
    pub message: String,
    /// Severity.
    pub level: NoticeLevel,
    /// RFC 3339 timestamp.
    pub sent_at: String,
}

/// `system.notify` result.
#[derive(Clone, Debug, Serialize)]
pub struct NotifyResult {
    /// Connections the notice was enqueued for.
    pub delivered: usize,
}

/// Returns a pong.
pub async fn ping(_ctx: HandlerContext, _params: NoParams) -> Result<Pong, RpcError> {
    Ok(Pong {
        message: "pong",
        status: "success",
    })
}

/// Server version, uptime and subscription counts.
pub fn info(registry: &ConnectionRegistry, started_at: Instant) -> SystemInfo {
    SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: started_at.elapsed().as_secs(),
        connections: registry.connection_count(),
        topics: Topic::ALL
            .into_iter()
            .map(|t| (t.as_str(), registry.subscribers(t).len()))
            .collect(),
    }
}

/// Broadcast an operator notice on `system.notice`.
pub fn notify(broadcaster: &Broadcaster, params: NotifyParams) -> Result<NotifyResult, RpcError> {
    if params.message.trim().is_empty() {
        return Err(RpcError::invalid_field("message", "message must not be empty"));
    }
    let notice = Notice {
        message: params.message,
        level: params.level,
        sent_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    };
    let report = broadcaster.publish(Topic::SystemNotice, &notice);
    Ok(NotifyResult {
        delivered: report.delivered,
    })
}

pub(super) fn register(builder: &mut RegistryBuilder, services: &HubServices) {
    let _ = builder
        .method("ping", "Liveness check. Returns `pong`.", ping)
        .http(HttpVerb::Get, "/api/ping");

    let registry = Arc::clone(&services.registry);
    let started_at = services.started_at;
    let _ = builder
        .method(
            "system.info",
            "Server version, uptime, connection and subscriber counts.",
            move |_ctx: HandlerContext, _params: NoParams| {
                let result = info(&registry, started_at);
                async move { Ok(result) }
            },
        )
        .http(HttpVerb::Get, "/api/info");

    let broadcaster = services.broadcaster.clone();
    let _ = builder
        .method(
            "system.notify",
            "Broadcast an operator notice to `system.notice` subscribers.",
            move |_ctx: HandlerContext, params: NotifyParams| {
                let result = notify(&broadcaster, params);
                async move { result }
            },
        )
        .http(HttpVerb::Post, "/api/notify");

    let _ = builder.event::<Notice>(Topic::SystemNotice, "Operator notice.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors;
    use crate::handlers::test_helpers::{http_ctx, make_services};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn ping_returns_pong() {
        let result = ping(http_ctx("ping"), NoParams).await.unwrap();
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"message": "pong", "status": "success"})
        );
    }

    #[test]
    fn info_reports_counts() {
        let services = make_services();
        let (c1, _rx1) = services.registry.register();
        let (_c2, _rx2) = services.registry.register();
        let _ = services.registry.subscribe(c1.id(), Topic::DataCreated).unwrap();

        let result = info(&services.registry, services.started_at);
        assert_eq!(result.connections, 2);
        assert_eq!(result.topics["data.created"], 1);
        assert_eq!(result.topics["system.notice"], 0);
        assert!(result.uptime_secs < 5);

        let v = serde_json::to_value(&result).unwrap();
        assert!(v["version"].is_string());
        assert!(v.get("uptimeSecs").is_some());
    }

    #[test]
    fn notify_reaches_notice_subscribers() {
        let services = make_services();
        let (c1, mut rx1) = services.registry.register();
        let _ = services.registry.subscribe(c1.id(), Topic::SystemNotice).unwrap();

        let result = notify(
            &services.broadcaster,
            NotifyParams {
                message: "maintenance at 5".into(),
                level: NoticeLevel::Warning,
            },
        )
        .unwrap();
        assert_eq!(result.delivered, 1);

        let frame: Value = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        assert_eq!(frame["method"], "system.notice");
        assert_eq!(frame["params"]["message"], "maintenance at 5");
        assert_eq!(frame["params"]["level"], "warning");
        assert!(frame.get("id").is_none());
    }

    #[test]
    fn notify_rejects_blank_message() {
        let services = make_services();
        let err = notify(
            &services.broadcaster,
            NotifyParams {
                message: "  ".into(),
                level: NoticeLevel::Info,
            },
        )
        .unwrap_err();
        assert_eq!(err.code(), errors::INVALID_PARAMS);
    }

    #[test]
    fn notify_params_default_level() {
        let p: NotifyParams = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(p.level, NoticeLevel::Info);
    }
}
