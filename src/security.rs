//! Pluggable credential modules for the connection handshake.
//!
//! The connecting side names the module it used and ships an opaque
//! credential; the accepting side routes that credential to the module
//! of the same name for validation. Rejections surface as
//! [`ProclinkError::InvalidCredential`] and carry no detail back to the
//! unauthenticated peer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ProclinkError, Result};

/// Identity facts the acceptor established out-of-band: the socket's
/// kernel-reported peer credentials plus what registration put on file.
#[derive(Debug, Clone, Copy)]
pub struct PeerIdentity {
    /// Effective uid reported by the socket (SO_PEERCRED).
    pub uid: u32,
    /// Effective gid reported by the socket.
    pub gid: u32,
}

/// A credential validation module.
pub trait SecurityModule: Send + Sync {
    /// Module name carried in the handshake.
    fn name(&self) -> &str;

    /// Credential this process presents when connecting.
    fn credential(&self) -> Vec<u8>;

    /// Validate a connecting peer's credential.
    fn validate(&self, identity: &PeerIdentity, credential: &[u8]) -> Result<()>;
}

/// Default module: trusts the kernel-verified socket credentials and
/// requires the peer to run as the same user as the server. Presents an
/// empty credential and accepts only empty credentials.
pub struct NativeSecurity {
    uid: u32,
}

impl NativeSecurity {
    pub fn new() -> Self {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        Self { uid }
    }

    /// Module trusting a specific uid (tests, delegated servers).
    pub fn for_uid(uid: u32) -> Self {
        Self { uid }
    }
}

impl Default for NativeSecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityModule for NativeSecurity {
    fn name(&self) -> &str {
        "native"
    }

    fn credential(&self) -> Vec<u8> {
        Vec::new()
    }

    fn validate(&self, identity: &PeerIdentity, credential: &[u8]) -> Result<()> {
        if !credential.is_empty() {
            return Err(ProclinkError::InvalidCredential);
        }
        if identity.uid != self.uid {
            return Err(ProclinkError::InvalidCredential);
        }
        Ok(())
    }
}

/// Name-keyed set of available security modules.
#[derive(Clone)]
pub struct SecurityRegistry {
    modules: HashMap<String, Arc<dyn SecurityModule>>,
}

impl SecurityRegistry {
    /// Registry containing only the native module.
    pub fn with_native() -> Self {
        let mut reg = Self {
            modules: HashMap::new(),
        };
        reg.add(Arc::new(NativeSecurity::new()));
        reg
    }

    /// Add a module; later additions shadow earlier ones of the same
    /// name.
    pub fn add(&mut self, module: Arc<dyn SecurityModule>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Select the module a handshake named.
    pub fn select(&self, name: &str) -> Result<Arc<dyn SecurityModule>> {
        self.modules
            .get(name)
            .cloned()
            .ok_or(ProclinkError::InvalidCredential)
    }

    /// The module this process presents when connecting out.
    pub fn default_module(&self) -> Arc<dyn SecurityModule> {
        self.modules
            .get("native")
            .or_else(|| self.modules.values().next())
            .cloned()
            .expect("registry always holds at least one module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_accepts_same_uid_empty_cred() {
        let module = NativeSecurity::for_uid(1000);
        let id = PeerIdentity {
            uid: 1000,
            gid: 1000,
        };
        assert!(module.validate(&id, b"").is_ok());
    }

    #[test]
    fn test_native_rejects_other_uid() {
        let module = NativeSecurity::for_uid(1000);
        let id = PeerIdentity { uid: 1001, gid: 0 };
        assert!(matches!(
            module.validate(&id, b""),
            Err(ProclinkError::InvalidCredential)
        ));
    }

    #[test]
    fn test_native_rejects_nonempty_credential() {
        let module = NativeSecurity::for_uid(1000);
        let id = PeerIdentity {
            uid: 1000,
            gid: 1000,
        };
        assert!(module.validate(&id, b"stray").is_err());
    }

    #[test]
    fn test_registry_selects_by_name() {
        let reg = SecurityRegistry::with_native();
        assert_eq!(reg.select("native").unwrap().name(), "native");
        assert!(matches!(
            reg.select("munge"),
            Err(ProclinkError::InvalidCredential)
        ));
    }

    #[test]
    fn test_registry_shadowing() {
        struct Permissive;
        impl SecurityModule for Permissive {
            fn name(&self) -> &str {
                "native"
            }
            fn credential(&self) -> Vec<u8> {
                b"tok".to_vec()
            }
            fn validate(&self, _id: &PeerIdentity, _cred: &[u8]) -> Result<()> {
                Ok(())
            }
        }

        let mut reg = SecurityRegistry::with_native();
        reg.add(Arc::new(Permissive));
        assert_eq!(reg.default_module().credential(), b"tok");
    }
}
