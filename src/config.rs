use std::{net::SocketAddr, path::PathBuf};

/// Default cap on the summed byte length of one call's input values.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1 << 30;

/// Runtime knobs for the service, normally filled from flags or the
/// environment by the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Shared secret callers must present. `None` disables the gate.
    pub api_key: Option<String>,
    /// Cap on the summed byte length of one call's input values.
    pub max_message_bytes: usize,
    /// File whose trimmed contents answer version queries. Read on every
    /// query so a redeploy shows up without a restart.
    pub version_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: ([127, 0, 0, 1], 50051).into(),
            api_key: None,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            version_file: PathBuf::from("VERSION"),
        }
    }
}
