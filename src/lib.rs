//! Dynamic function dispatch over TCP: a string-keyed registry of typed
//! functions, called with generically encoded arguments.
//!
//! Functions are plain async closures adapted by [`unary`] and
//! [`streaming`]; their argument and return types fix the kind contract
//! the declared [`Signature`] is checked against at registration. At
//! call time the [`Engine`] decodes each input by its declared [`Kind`],
//! runs the function with panics contained, and encodes what comes back.
//! Streamed results are sequenced, and the final message is only marked
//! once the producer's end is known, at the cost of one message of
//! look-ahead.
//!
//! [`Server`] and [`Client`] carry calls over TCP, one request per
//! connection, with an optional shared-secret gate in front of every
//! call.

pub mod auth;
pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod net;
pub mod options;
pub mod registry;
pub mod status;
pub mod types;

pub use auth::AuthGate;
pub use config::{ServerConfig, DEFAULT_MAX_MESSAGE_BYTES};
pub use dispatch::Engine;
pub use net::{
    client::{Client, ClientError, FunctionStream},
    server::Server,
};
pub use registry::{
    streaming, unary, Callable, FunctionError, Registry, RegistryError, ValueStream,
};
pub use status::{Code, Status};
pub use types::{InputValue, Kind, OutputValue, Parameter, Signature, StreamMessage, Value};
