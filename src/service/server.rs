// src/service/server.rs

//! Store service: serves a [`SecureStore`] on a Unix socket
//!
//! Each connection is handled on its own thread. The caller is identified
//! by `SO_PEERCRED`, never by anything it sends.

use super::auth::{AuthChecker, PeerCredentials};
use super::protocol::{read_message, write_message, Request, Response};
use super::ServiceConfig;
use crate::error::{Error, Result};
use crate::store::{DirectoryStore, ImplementationStore, SecureStore, SecurityContext, ServiceIdentity};
use std::io::BufReader;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// The privileged half of the store
#[derive(Clone)]
pub struct StoreServer {
    store: Arc<SecureStore>,
    auth: Arc<AuthChecker>,
    config: ServiceConfig,
}

impl StoreServer {
    /// Open the store described by `config`, owned by the running identity
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let inner = DirectoryStore::new(&config.store_root)?;
        let store = SecureStore::new(inner, ServiceIdentity::current())
            .with_audit_history(config.audit_history);
        let mut auth = AuthChecker::new().with_trusted_gids(config.admin_gids.clone());
        if !config.allow_contributions {
            auth = auth.disable_contributions();
        }
        Ok(Self::with_store(store, auth, config))
    }

    pub fn with_store(store: SecureStore, auth: AuthChecker, config: ServiceConfig) -> Self {
        Self {
            store: Arc::new(store),
            auth: Arc::new(auth),
            config,
        }
    }

    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    /// Bind the service socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener> {
        let path = &self.config.socket_path;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            Error::IoError(format!("Failed to bind Unix socket at {}: {}", path.display(), e))
        })?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.config.socket_mode))?;

        info!(
            "Listening on {} (mode {:o}) for store {}",
            path.display(),
            self.config.socket_mode,
            self.store.inner().describe()
        );
        Ok(listener)
    }

    /// Bind and serve until the listener fails
    pub fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    /// Accept connections forever
    pub fn serve(&self, listener: UnixListener) -> Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
        Ok(())
    }

    /// Answer the single request of one connection
    pub fn handle_connection(&self, stream: UnixStream) {
        let caller = match PeerCredentials::from_stream(&stream) {
            Ok(creds) => creds,
            Err(e) => {
                warn!("Rejecting connection without peer credentials: {}", e);
                return;
            }
        };

        if let Err(e) = stream.set_read_timeout(Some(self.config.request_timeout)) {
            warn!("Failed to set request timeout for uid={}: {}", caller.uid, e);
            return;
        }

        let mut reader = match stream.try_clone() {
            Ok(read_half) => BufReader::new(read_half),
            Err(e) => {
                warn!("Failed to clone connection: {}", e);
                return;
            }
        };
        let request: Request = match read_message(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                let mut writer = &stream;
                let _ = write_message(&mut writer, &Response::from_error(&e));
                return;
            }
        };

        debug!("uid={} requested {:?}", caller.uid, request);
        let response = self.dispatch(caller, request);

        let mut writer = &stream;
        if let Err(e) = write_message(&mut writer, &response) {
            warn!("Failed to answer uid={}: {}", caller.uid, e);
        }
    }

    /// Authorize and execute one request
    pub fn dispatch(&self, caller: PeerCredentials, request: Request) -> Response {
        let ctx = SecurityContext::new(caller, self.auth.is_admin(&caller));
        let action = request.action();

        if !self.auth.is_allowed(&caller, action) {
            self.store.audit(&ctx, action, false, "refused by policy");
            return Response::from_error(&Error::PermissionDenied(format!(
                "{:?} is not allowed for uid {}",
                action, caller.uid
            )));
        }

        let session = self.store.session(&ctx);
        let result = match request {
            Request::Contains { digest } => Ok(Response::Contains {
                present: session.contains(&digest),
            }),
            Request::GetPath { digest } => session.get_path(&digest).map(|path| Response::Path { path }),
            Request::Stage => session.stage_new().map(|staging| Response::Staged { staging }),
            Request::VerifyAndCommit { staging, digest } => session
                .verify_and_commit(&staging, &digest)
                .map(|outcome| Response::Committed { outcome }),
            Request::Discard { staging } => session.discard_staging(&staging).map(|_| Response::Done),
            Request::Remove { digest } => session.remove(&digest).map(|_| Response::Done),
            Request::List => session.list_all().map(|digests| Response::Digests { digests }),
            Request::ListTemp => session.list_all_temp().map(|paths| Response::Paths { paths }),
            Request::Verify { digest } => session.verify(&digest).map(|_| Response::Done),
            Request::Optimise => session.optimise().map(|bytes| Response::Reclaimed { bytes }),
        };

        result.unwrap_or_else(|e| Response::from_error(&e))
    }
}
