use super::{Call, Request, Response};
use crate::{
    status::Status,
    types::{InputValue, OutputValue, Signature, StreamMessage},
};
use async_bincode::{tokio::AsyncBincodeStream, AsyncDestination};
use futures::{SinkExt, StreamExt};
use std::{collections::BTreeMap, io, net::SocketAddr};
use thiserror::Error;
use tokio::{io::BufStream, net::TcpStream};

type Wire = AsyncBincodeStream<BufStream<TcpStream>, Response, Request, AsyncDestination>;

/// Calls a remote engine, one connection per request.
pub struct Client {
    addr: SocketAddr,
    credential: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connecting: {0}")]
    Connect(#[from] io::Error),
    #[error("transport: {0}")]
    Transport(String),
    #[error("connection closed before a response arrived")]
    NoResponse,
    #[error("server sent a response of the wrong shape")]
    WrongShape,
    #[error(transparent)]
    Status(#[from] Status),
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            credential: None,
        }
    }

    /// Attaches the shared secret sent with every request.
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    async fn connect(&self) -> Result<Wire, ClientError> {
        let sock = TcpStream::connect(self.addr).await?;
        Ok(AsyncBincodeStream::from(BufStream::new(sock)).for_async())
    }

    async fn send(&self, sock: &mut Wire, call: Call) -> Result<(), ClientError> {
        let req = Request {
            credential: self.credential.clone(),
            call,
        };
        sock.send(req)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn send_recv(&self, call: Call) -> Result<Response, ClientError> {
        let mut sock = self.connect().await?;
        self.send(&mut sock, call).await?;
        recv(&mut sock).await
    }

    pub async fn health(&self) -> Result<String, ClientError> {
        match self.send_recv(Call::Health).await? {
            Response::Health(result) => Ok(result?),
            _ => Err(ClientError::WrongShape),
        }
    }

    pub async fn version(&self) -> Result<String, ClientError> {
        match self.send_recv(Call::Version).await? {
            Response::Version(result) => Ok(result?),
            _ => Err(ClientError::WrongShape),
        }
    }

    pub async fn list_functions(&self) -> Result<BTreeMap<String, Signature>, ClientError> {
        match self.send_recv(Call::ListFunctions).await? {
            Response::Functions(result) => Ok(result?),
            _ => Err(ClientError::WrongShape),
        }
    }

    pub async fn run(
        &self,
        name: &str,
        inputs: Vec<InputValue>,
    ) -> Result<Vec<OutputValue>, ClientError> {
        let call = Call::Run {
            name: name.to_owned(),
            inputs,
        };
        match self.send_recv(call).await? {
            Response::Run(result) => Ok(result?),
            _ => Err(ClientError::WrongShape),
        }
    }

    /// Opens a streamed call. Messages arrive in sequence order; the one
    /// marked final is the last, after which [`FunctionStream::next`]
    /// yields `None`.
    pub async fn stream(
        &self,
        name: &str,
        inputs: Vec<InputValue>,
    ) -> Result<FunctionStream, ClientError> {
        let mut sock = self.connect().await?;
        let call = Call::Stream {
            name: name.to_owned(),
            inputs,
        };
        self.send(&mut sock, call).await?;
        Ok(FunctionStream { sock, done: false })
    }
}

async fn recv(sock: &mut Wire) -> Result<Response, ClientError> {
    sock.next()
        .await
        .ok_or(ClientError::NoResponse)?
        .map_err(|e| ClientError::Transport(e.to_string()))
}

/// The consumer half of a streamed call.
pub struct FunctionStream {
    sock: Wire,
    done: bool,
}

impl FunctionStream {
    /// The next message, or `None` once the final one has been taken.
    pub async fn next(&mut self) -> Result<Option<StreamMessage>, ClientError> {
        if self.done {
            return Ok(None);
        }
        match recv(&mut self.sock).await? {
            Response::Stream(Ok(msg)) => {
                if msg.is_final {
                    self.done = true;
                }
                Ok(Some(msg))
            }
            Response::Stream(Err(status)) => {
                // An error ends the sequence; nothing follows it.
                self.done = true;
                Err(status.into())
            }
            _ => Err(ClientError::WrongShape),
        }
    }

    /// Drains the remaining messages into memory.
    pub async fn collect(mut self) -> Result<Vec<StreamMessage>, ClientError> {
        let mut messages = Vec::new();
        while let Some(msg) = self.next().await? {
            messages.push(msg);
        }
        Ok(messages)
    }
}
