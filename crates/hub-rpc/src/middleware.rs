//! Middleware chain around handler invocation.
//!
//! Middleware run in registration order, first added outermost. Each stage
//! receives a [`Next`] cursor and decides whether and how to continue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::context::HandlerContext;
use crate::errors::RpcError;
use crate::registry::{ErasedHandler, HandlerResult};

/// Cross-cutting behavior wrapped around every call.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle one call. Call `next.run(ctx, params)` to continue the chain.
    async fn handle(
        &self,
        ctx: HandlerContext,
        params: Option<Value>,
        next: Next<'_>,
    ) -> HandlerResult;
}

/// Cursor over the remaining middleware plus the resolved endpoint.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    endpoint: &'a ErasedHandler,
    chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(endpoint: &'a ErasedHandler, chain: &'a [Arc<dyn Middleware>]) -> Self {
        Self { endpoint, chain }
    }

    /// Run the next stage.
    ///
    /// A panic in that stage (or anything below it) is caught here and
    /// converted to [`RpcError::Internal`], so enclosing middleware always
    /// observe a result.
    pub async fn run(self, ctx: HandlerContext, params: Option<Value>) -> HandlerResult {
        let method = ctx.method().to_owned();
        let request_id = ctx.request_id().map(str::to_owned);
        let conn_id = ctx.connection().map(|c| c.id().to_string());

        let stage: BoxFuture<'a, HandlerResult> = match self.chain.split_first() {
            Some((head, rest)) => head.handle(
                ctx,
                params,
                Next {
                    endpoint: self.endpoint,
                    chain: rest,
                },
            ),
            None => (self.endpoint)(ctx, params),
        };

        match AssertUnwindSafe(stage).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                error!(
                    method = %method,
                    request_id = request_id.as_deref(),
                    conn_id = conn_id.as_deref(),
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked"
                );
                Err(RpcError::internal("internal error"))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Emits a start event and a completion event with timing and outcome for
/// every call, and records `duration_ms` / `success` on the call's span.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        ctx: HandlerContext,
        params: Option<Value>,
        next: Next<'_>,
    ) -> HandlerResult {
        let span = ctx.span().clone();
        let start = Instant::now();
        debug!("request started");

        let result = next.run(ctx, params).await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let _ = span.record("duration_ms", duration_ms);
        let _ = span.record("success", result.is_ok());
        match &result {
            Ok(_) => info!(duration_ms, success = true, "request finished"),
            Err(err) => info!(
                duration_ms,
                success = false,
                code = err.code(),
                error = %err,
                "request finished"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Transport;
    use crate::errors;
    use crate::registry::{NoParams, RegistryBuilder};
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(
            &self,
            ctx: HandlerContext,
            params: Option<Value>,
            next: Next<'_>,
        ) -> HandlerResult {
            self.log.lock().push(format!("{}:before", self.name));
            let result = next.run(ctx, params).await;
            self.log.lock().push(format!("{}:after", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _: HandlerContext, _: Option<Value>, _: Next<'_>) -> HandlerResult {
            Err(RpcError::custom(-32050, "blocked"))
        }
    }

    struct Exploding;

    #[async_trait]
    impl Middleware for Exploding {
        async fn handle(&self, _: HandlerContext, _: Option<Value>, _: Next<'_>) -> HandlerResult {
            panic!("middleware blew up");
        }
    }

    fn ctx() -> HandlerContext {
        HandlerContext::new("m", Some("1".into()), Transport::Http, None)
    }

    fn registry() -> crate::registry::HandlerRegistry {
        let mut b = RegistryBuilder::new();
        let _ = b.method("ok", "", |_ctx, _p: NoParams| async { Ok(json!("done")) });
        let _ = b.method("boom", "", |_ctx, _p: NoParams| async {
            if true {
                panic!("handler blew up");
            }
            Ok(())
        });
        b.build().unwrap()
    }

    #[tokio::test]
    async fn empty_chain_runs_endpoint() {
        let reg = registry();
        let out = Next::new(reg.get("ok").unwrap(), &[]).run(ctx(), None).await;
        assert_eq!(out.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn first_added_is_outermost() {
        let reg = registry();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder { name: "a", log: Arc::clone(&log) }),
            Arc::new(Recorder { name: "b", log: Arc::clone(&log) }),
        ];
        let out = Next::new(reg.get("ok").unwrap(), &chain).run(ctx(), None).await;
        assert!(out.is_ok());
        assert_eq!(*log.lock(), ["a:before", "b:before", "b:after", "a:after"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let reg = registry();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ShortCircuit),
            Arc::new(Recorder { name: "inner", log: Arc::clone(&log) }),
        ];
        let err = Next::new(reg.get("ok").unwrap(), &chain)
            .run(ctx(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32050);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_and_outer_stage_completes() {
        let reg = registry();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(LoggingMiddleware),
            Arc::new(Recorder { name: "r", log: Arc::clone(&log) }),
        ];
        let err = Next::new(reg.get("boom").unwrap(), &chain)
            .run(ctx(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::INTERNAL_ERROR);
        assert_eq!(*log.lock(), ["r:before", "r:after"]);
    }

    #[tokio::test]
    async fn middleware_panic_becomes_internal() {
        let reg = registry();
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(LoggingMiddleware), Arc::new(Exploding)];
        let err = Next::new(reg.get("ok").unwrap(), &chain)
            .run(ctx(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), errors::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn logging_middleware_passes_result_through() {
        let reg = registry();
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(LoggingMiddleware)];
        let out = Next::new(reg.get("ok").unwrap(), &chain).run(ctx(), None).await;
        assert_eq!(out.unwrap(), json!("done"));
    }

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
