use clap::Parser;
use funcwire::{builtins, Server, ServerConfig, DEFAULT_MAX_MESSAGE_BYTES};
use std::{net::SocketAddr, path::PathBuf, process::ExitCode};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Function dispatch service: registered functions callable by name over
/// TCP.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "FUNCWIRE_LISTEN", default_value = "127.0.0.1:50051")]
    listen: SocketAddr,

    /// Shared secret callers must present. Unset disables the check.
    #[arg(long, env = "FUNCWIRE_API_KEY")]
    api_key: Option<String>,

    /// Cap on the summed byte length of one call's input values.
    #[arg(long, env = "FUNCWIRE_MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    max_message_bytes: usize,

    /// File whose trimmed contents answer version queries.
    #[arg(long, env = "FUNCWIRE_VERSION_FILE", default_value = "VERSION")]
    version_file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("funcwire=info")),
        )
        .init();

    let args = Args::parse();
    let registry = match builtins::registry() {
        Ok(reg) => reg,
        Err(e) => {
            error!("registering builtins: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        listen: args.listen,
        api_key: args.api_key,
        max_message_bytes: args.max_message_bytes,
        version_file: args.version_file,
    };
    if let Err(e) = Server::new(config, registry).serve().await {
        error!("serving: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
