use crate::{
    auth::AuthGate,
    config::ServerConfig,
    dispatch::Engine,
    net::{Call, Request, Response},
    registry::Registry,
    status::Status,
    types::{InputValue, StreamMessage},
};
use async_bincode::tokio::AsyncBincodeStream;
use futures::{SinkExt, StreamExt};
use std::{io, sync::Arc};
use tokio::{
    io::BufStream,
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task,
};
use tracing::{info, warn};

/// Serves an engine over TCP, one request per connection.
pub struct Server {
    engine: Engine,
    gate: AuthGate,
    config: ServerConfig,
}

enum Reply {
    One(Response),
    Stream(mpsc::Receiver<Result<StreamMessage, Status>>),
}

impl Server {
    pub fn new(config: ServerConfig, registry: Registry) -> Self {
        let gate = AuthGate::new(config.api_key.clone());
        Self {
            engine: Engine::new(Arc::new(registry)),
            gate,
            config,
        }
    }

    /// Binds the configured address and serves until accepting fails.
    pub async fn serve(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener, for callers that need the
    /// actual port before the first request arrives.
    pub async fn serve_on(self, listener: TcpListener) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, functions = self.engine.registry().len(), "listening");
        }
        let root_arc = Arc::new(self);
        loop {
            let arc_self = root_arc.clone();
            let (sock, _addr) = listener.accept().await?;
            task::spawn(async move {
                arc_self.handle_connection(sock).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, sock: TcpStream) {
        let mut sock =
            AsyncBincodeStream::<_, Request, Response, _>::from(BufStream::new(sock)).for_async();
        let Some(Ok(request)) = sock.next().await else {
            return;
        };
        match self.handle_call(request).await {
            Reply::One(response) => {
                _ = sock.send(response).await;
            }
            Reply::Stream(mut rx) => {
                while let Some(item) = rx.recv().await {
                    if sock.send(Response::Stream(item)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn handle_call(&self, request: Request) -> Reply {
        let Request { credential, call } = request;
        if let Err(denied) = self.gate.authorize(credential.as_deref()) {
            return Reply::One(match call {
                Call::Health => Response::Health(Err(denied)),
                Call::Version => Response::Version(Err(denied)),
                Call::ListFunctions => Response::Functions(Err(denied)),
                Call::Run { .. } => Response::Run(Err(denied)),
                Call::Stream { .. } => Response::Stream(Err(denied)),
            });
        }
        match call {
            Call::Health => Reply::One(Response::Health(Ok("OK".to_owned()))),
            Call::Version => Reply::One(Response::Version(self.read_version().await)),
            Call::ListFunctions => {
                Reply::One(Response::Functions(Ok(self.engine.registry().signatures())))
            }
            Call::Run { name, inputs } => {
                if let Err(e) = self.check_payload(&inputs) {
                    return Reply::One(Response::Run(Err(e)));
                }
                Reply::One(Response::Run(self.engine.run(&name, &inputs).await))
            }
            Call::Stream { name, inputs } => {
                if let Err(e) = self.check_payload(&inputs) {
                    return Reply::One(Response::Stream(Err(e)));
                }
                match self.engine.stream(&name, &inputs).await {
                    Ok(rx) => Reply::Stream(rx),
                    Err(e) => Reply::One(Response::Stream(Err(e))),
                }
            }
        }
    }

    fn check_payload(&self, inputs: &[InputValue]) -> Result<(), Status> {
        let total: usize = inputs
            .iter()
            .map(|iv| iv.value.as_deref().map_or(0, str::len))
            .sum();
        if total > self.config.max_message_bytes {
            return Err(Status::invalid_argument(format!(
                "inputs total {total} bytes, over the {} byte limit",
                self.config.max_message_bytes
            )));
        }
        Ok(())
    }

    async fn read_version(&self) -> Result<String, Status> {
        let raw = tokio::fs::read_to_string(&self.config.version_file)
            .await
            .map_err(|e| {
                warn!(file = %self.config.version_file.display(), "version file unreadable");
                Status::internal(format!("cannot read version file: {e}"))
            })?;
        let version = raw.trim().to_owned();
        if version.is_empty() {
            return Err(Status::internal("version file is empty"));
        }
        Ok(version)
    }
}
