//! # hub-rpc
//!
//! Protocol layer shared by both transports.
//!
//! - Wire envelopes ([`RpcRequest`], [`RpcResponse`]) and the error taxonomy
//! - [`RegistryBuilder`]: typed handler registration, frozen into an
//!   immutable [`HandlerRegistry`] before serving starts
//! - [`Middleware`] chain with a structured-logging stage
//! - [`Dispatcher`]: decode, resolve, invoke, encode
//! - Built-in handlers (`ping`, `subscribe`, `data.*`, ...)

#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod types;

pub use context::{HandlerContext, Transport};
pub use dispatch::Dispatcher;
pub use errors::RpcError;
pub use middleware::{LoggingMiddleware, Middleware, Next};
pub use registry::{
    ApiDescriptor, ApiKind, HandlerRegistry, HandlerResult, HttpRoute, HttpVerb, MethodBuilder,
    NoParams, RegistryBuilder, RegistryError,
};
pub use types::{RpcErrorBody, RpcRequest, RpcResponse};
