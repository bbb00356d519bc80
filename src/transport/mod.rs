//! Transport: Unix sockets and endpoint rendezvous.
//!
//! The launcher interface is environment-only: a server advertises its
//! endpoint and negotiated selections in `PROCLINK_*` variables before
//! spawning children, and a connecting client discovers them from its
//! inherited environment. The transport never talks to the launcher
//! directly.

pub mod socket;

pub use socket::{generate_socket_path, SocketListener, SocketStream};

use crate::error::{ProclinkError, Result};

/// Environment variable carrying the server socket path.
pub const ENV_SERVER_URI: &str = "PROCLINK_SERVER_URI";
/// Environment variable carrying the server's codec selection.
pub const ENV_CODEC: &str = "PROCLINK_CODEC";
/// Environment variable carrying the server's data-store selection.
pub const ENV_STORE: &str = "PROCLINK_STORE";

/// Endpoint facts a child needs to reach its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub socket_path: String,
    pub codec_name: String,
    pub store_name: String,
}

impl Endpoint {
    /// Environment pairs to place in a spawned child's environment.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_SERVER_URI, self.socket_path.clone()),
            (ENV_CODEC, self.codec_name.clone()),
            (ENV_STORE, self.store_name.clone()),
        ]
    }

    /// Discover the endpoint from this process's inherited environment.
    pub fn from_env() -> Result<Self> {
        let socket_path = std::env::var(ENV_SERVER_URI)
            .map_err(|_| ProclinkError::BadParam("no server endpoint in environment"))?;
        let codec_name = std::env::var(ENV_CODEC).unwrap_or_else(|_| "builtin".to_string());
        let store_name = std::env::var(ENV_STORE).unwrap_or_else(|_| "hash".to_string());
        Ok(Self {
            socket_path,
            codec_name,
            store_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_env_pairs() {
        let ep = Endpoint {
            socket_path: "/tmp/x.sock".into(),
            codec_name: "builtin".into(),
            store_name: "hash".into(),
        };
        let env = ep.to_env();
        assert_eq!(env[0], (ENV_SERVER_URI, "/tmp/x.sock".to_string()));
        assert_eq!(env.len(), 3);
    }
}
