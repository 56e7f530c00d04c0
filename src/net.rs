pub mod client;
pub mod server;

use crate::{
    status::Status,
    types::{InputValue, OutputValue, Signature, StreamMessage},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One request per connection. The credential travels alongside the call
/// so the gate can run before anything else is examined.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Request {
    pub credential: Option<String>,
    pub call: Call,
}

#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Call {
    Health,
    Version,
    ListFunctions,
    Run { name: String, inputs: Vec<InputValue> },
    Stream { name: String, inputs: Vec<InputValue> },
}

/// Each variant answers the matching [`Call`]. `Stream` frames repeat
/// until one carries `is_final` or an error ends the sequence.
#[derive(Serialize, Deserialize, Debug)]
pub(crate) enum Response {
    Health(Result<String, Status>),
    Version(Result<String, Status>),
    Functions(Result<BTreeMap<String, Signature>, Status>),
    Run(Result<Vec<OutputValue>, Status>),
    Stream(Result<StreamMessage, Status>),
}
