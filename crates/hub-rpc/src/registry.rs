//! Typed handler registration.
//!
//! Handlers are plain async closures over a deserializable params type and a
//! serializable result type. [`RegistryBuilder::method`] erases them into a
//! uniform `Fn(HandlerContext, Option<Value>)` endpoint that does the whole
//! decode → call → encode sequence, so the dispatcher never sees concrete
//! types. The builder is consumed by [`RegistryBuilder::build`], which
//! validates the table and freezes it into an immutable [`HandlerRegistry`].

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use hub_core::Topic;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::context::HandlerContext;
use crate::errors::RpcError;

/// Result of one handler invocation, already encoded.
pub type HandlerResult = Result<Value, RpcError>;

/// Type-erased endpoint stored per method.
pub(crate) type ErasedHandler =
    Arc<dyn Fn(HandlerContext, Option<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Params type for methods that take none. Accepts anything, including a
/// missing `params` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoParams;

impl<'de> Deserialize<'de> for NoParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let _ = IgnoredAny::deserialize(deserializer)?;
        Ok(NoParams)
    }
}

/// HTTP verb for a per-method route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    /// `GET`, params are ignored.
    Get,
    /// `POST`, body is the params object.
    Post,
    /// `PUT`, body is the params object.
    Put,
    /// `DELETE`, body is the params object.
    Delete,
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Delete => "DELETE",
        })
    }
}

/// A documented HTTP route bound to a method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HttpRoute {
    /// Verb.
    pub verb: HttpVerb,
    /// Absolute path, e.g. `/api/ping`.
    pub path: String,
}

/// What a descriptor describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKind {
    /// Callable method.
    Method,
    /// Push event topic.
    Event,
}

/// Read-only registration descriptor consumed by documentation and client
/// generation tooling.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    /// Method or event.
    pub kind: ApiKind,
    /// Method name or topic wire name.
    pub name: String,
    /// Params type (methods) or payload type (events).
    pub request_type: String,
    /// Result type. Absent for events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    /// Free-text documentation.
    pub docs: String,
    /// HTTP route, if the method is also exposed outside `/rpc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRoute>,
}

/// Fatal configuration errors found while freezing the registry.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// Two registrations share a method name.
    #[error("method '{name}' registered more than once")]
    DuplicateMethod {
        /// Method name.
        name: String,
    },
    /// Two event descriptors share a topic.
    #[error("event '{topic}' registered more than once")]
    DuplicateEvent {
        /// Topic.
        topic: Topic,
    },
    /// Method name is empty or contains whitespace.
    #[error("invalid method name '{name}'")]
    InvalidMethodName {
        /// Offending name.
        name: String,
    },
    /// HTTP path does not start with `/` or contains whitespace.
    #[error("invalid http path '{path}' for method '{method}'")]
    InvalidRoute {
        /// Method the route was declared on.
        method: String,
        /// Offending path.
        path: String,
    },
    /// Two methods declare the same verb and path.
    #[error("http route {verb} {path} declared by both '{first}' and '{second}'")]
    DuplicateRoute {
        /// Verb.
        verb: HttpVerb,
        /// Path.
        path: String,
        /// First method.
        first: String,
        /// Second method.
        second: String,
    },
}

/// Mutable registration table used during startup.
#[derive(Default)]
pub struct RegistryBuilder {
    endpoints: Vec<(String, ErasedHandler)>,
    descriptors: Vec<ApiDescriptor>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler under `name`.
    pub fn method<P, R, F, Fut>(&mut self, name: &str, docs: &str, handler: F) -> MethodBuilder<'_>
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(HandlerContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let endpoint: ErasedHandler = Arc::new(move |ctx: HandlerContext, params: Option<Value>| {
            let handler = Arc::clone(&handler);
            async move {
                let params: P = decode_params(params)?;
                let result = (*handler)(ctx, params).await?;
                serde_json::to_value(result)
                    .map_err(|e| RpcError::internal(format!("failed to encode result: {e}")))
            }
            .boxed()
        });

        self.endpoints.push((name.to_owned(), endpoint));
        self.descriptors.push(ApiDescriptor {
            kind: ApiKind::Method,
            name: name.to_owned(),
            request_type: short_type_name::<P>(),
            response_type: Some(short_type_name::<R>()),
            docs: docs.to_owned(),
            http: None,
        });
        let index = self.descriptors.len() - 1;
        MethodBuilder {
            builder: self,
            index,
        }
    }

    /// Record a push event descriptor for `topic` carrying payload `T`.
    pub fn event<T>(&mut self, topic: Topic, docs: &str) -> &mut Self {
        self.descriptors.push(ApiDescriptor {
            kind: ApiKind::Event,
            name: topic.as_str().to_owned(),
            request_type: short_type_name::<T>(),
            response_type: None,
            docs: docs.to_owned(),
            http: None,
        });
        self
    }

    /// Validate and freeze the table.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let mut handlers = HashMap::with_capacity(self.endpoints.len());
        for (name, endpoint) in self.endpoints {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(RegistryError::InvalidMethodName { name });
            }
            if handlers.contains_key(&name) {
                return Err(RegistryError::DuplicateMethod { name });
            }
            let _ = handlers.insert(name, endpoint);
        }

        let mut events = HashSet::new();
        let mut routes: HashMap<(HttpVerb, String), String> = HashMap::new();
        for desc in &self.descriptors {
            if desc.kind == ApiKind::Event {
                let topic: Topic = desc
                    .name
                    .parse()
                    .map_err(|_| RegistryError::InvalidMethodName {
                        name: desc.name.clone(),
                    })?;
                if !events.insert(topic) {
                    return Err(RegistryError::DuplicateEvent { topic });
                }
                continue;
            }
            let Some(route) = &desc.http else { continue };
            if !route.path.starts_with('/') || route.path.chars().any(char::is_whitespace) {
                return Err(RegistryError::InvalidRoute {
                    method: desc.name.clone(),
                    path: route.path.clone(),
                });
            }
            if let Some(first) = routes.insert((route.verb, route.path.clone()), desc.name.clone()) {
                return Err(RegistryError::DuplicateRoute {
                    verb: route.verb,
                    path: route.path.clone(),
                    first,
                    second: desc.name.clone(),
                });
            }
        }

        let mut descriptors = self.descriptors;
        descriptors.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        Ok(HandlerRegistry {
            handlers,
            descriptors,
        })
    }
}

/// Returned by [`RegistryBuilder::method`] to attach optional metadata.
pub struct MethodBuilder<'a> {
    builder: &'a mut RegistryBuilder,
    index: usize,
}

impl MethodBuilder<'_> {
    /// Also expose the method at `verb path`.
    pub fn http(self, verb: HttpVerb, path: &str) -> Self {
        if let Some(desc) = self.builder.descriptors.get_mut(self.index) {
            desc.http = Some(HttpRoute {
                verb,
                path: path.to_owned(),
            });
        }
        self
    }
}

/// Immutable method table, shared by `Arc` across every connection.
pub struct HandlerRegistry {
    handlers: HashMap<String, ErasedHandler>,
    descriptors: Vec<ApiDescriptor>,
}

impl HandlerRegistry {
    pub(crate) fn get(&self, method: &str) -> Option<&ErasedHandler> {
        self.handlers.get(method)
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every method and event descriptor, methods first, each sorted by name.
    pub fn descriptors(&self) -> &[ApiDescriptor] {
        &self.descriptors
    }

    /// `(method, route)` for every method with an HTTP binding.
    pub fn routes(&self) -> Vec<(&str, &HttpRoute)> {
        self.descriptors
            .iter()
            .filter_map(|d| d.http.as_ref().map(|r| (d.name.as_str(), r)))
            .collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

/// Absent or `null` params decode as `null`, falling back to `{}` so that
/// all-optional structs accept a bare call.
fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, RpcError> {
    match params.filter(|v| !v.is_null()) {
        Some(raw) => serde_json::from_value(raw).map_err(|e| params_error(&e)),
        None => serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(Map::new())))
            .map_err(|e| params_error(&e)),
    }
}

fn params_error(err: &serde_json::Error) -> RpcError {
    let message = err.to_string();
    match missing_field(&message) {
        Some(field) => RpcError::invalid_field(field, message.clone()),
        None => RpcError::invalid_params(message),
    }
}

fn missing_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

fn short_type_name<T: ?Sized>() -> String {
    let full = type_name::<T>();
    if full.contains('<') {
        return full.to_owned();
    }
    full.rsplit("::").next().unwrap_or(full).to_owned()
}
