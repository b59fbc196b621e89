//! TCP acceptor
//!
//! Binds the listen socket, accepts connections and hands each socket to a
//! session task. Shutdown stops the acceptor, waits out a grace period and
//! then drops whatever is still connected.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use gitsvn_core::access::AccessRules;
use gitsvn_core::hooks::HookManager;
use gitsvn_core::repository::{Repository, RepositoryMapping};
use gitsvn_core::store::{FjallStore, KeyValueStore, MemoryStore, ObjectStore};
use gitsvn_core::users::{HtpasswdUserDb, LocalUserDb, UserDb, UserEntry};

use crate::config::Config;
use crate::session::{serve_connection, SharedContext};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the shared context: repositories, mapping and user database.
pub fn build_shared(config: Config) -> anyhow::Result<Arc<SharedContext>> {
    let access = if config.anonymous_read {
        AccessRules::anonymous_read()
    } else {
        AccessRules::authenticated_only()
    };

    let users: Arc<dyn UserDb> = match &config.users_file {
        Some(path) => Arc::new(
            HtpasswdUserDb::from_file(path)
                .map_err(|e| anyhow::anyhow!("failed to load users file: {e}"))?,
        ),
        None => Arc::new(LocalUserDb::new(
            config
                .users
                .iter()
                .map(|(name, user)| {
                    (
                        name.clone(),
                        UserEntry {
                            password: user.password.clone(),
                            real_name: user.real_name.clone().unwrap_or_else(|| name.clone()),
                            email: user.email.clone(),
                        },
                    )
                })
                .collect(),
        )),
    };

    let mut mapping = RepositoryMapping::new();
    for (name, repo_config) in &config.repositories {
        let store_path = repo_config.path.clone().or_else(|| {
            config
                .cache
                .path
                .as_ref()
                .map(|cache| cache.join(name))
        });
        let (store, meta): (Arc<dyn ObjectStore>, KeyValueStore) = match &store_path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                let store = Arc::new(FjallStore::open(path)?);
                let meta = KeyValueStore::Fjall(store.meta());
                (store, meta)
            }
            None => {
                let store = Arc::new(MemoryStore::new());
                let meta = KeyValueStore::Memory(store.meta());
                (store, meta)
            }
        };
        let hooks = match (&store_path, config.hooks_enabled) {
            (Some(path), true) => HookManager::new(
                path.clone(),
                config.hook_env.clone().into_iter().collect(),
            ),
            _ => HookManager::disabled(),
        };
        let repository = Repository::open(
            name,
            store,
            meta,
            hooks,
            access.clone(),
            std::slice::from_ref(&repo_config.branch),
            repo_config.rename_detection,
        )?;
        let prefix = repo_config.prefix.clone().unwrap_or_else(|| name.clone());
        mapping.register(&prefix, Arc::new(repository), &repo_config.branch);
        info!(repository = %name, prefix = %prefix, "registered repository");
    }

    Ok(Arc::new(SharedContext {
        config,
        mapping,
        users,
    }))
}

/// Initialise every registered repository (bootstrap revision 0).
pub async fn initialize_repositories(shared: &SharedContext) -> anyhow::Result<()> {
    for repository in shared.mapping.repositories() {
        repository
            .initialize()
            .await
            .map_err(|e| anyhow::anyhow!("failed to initialize '{}': {e}", repository.name()))?;
    }
    Ok(())
}

/// The listening server.
pub struct SvnServer {
    listener: TcpListener,
    shared: Arc<SharedContext>,
}

impl SvnServer {
    pub async fn bind(shared: Arc<SharedContext>) -> anyhow::Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", shared.config.host, shared.config.port).parse()?;
        let socket = if addr.is_ipv6() {
            TcpSocket::new_v6()?
        } else {
            TcpSocket::new_v4()?
        };
        socket.set_reuseaddr(shared.config.reuse_address)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener, shared })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` resolves, then drain with a grace period.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("error accepting connection: {e}");
                            continue;
                        }
                    };
                    info!(peer = %peer, "new connection");
                    let _ = stream.set_nodelay(true);
                    let shared = self.shared.clone();
                    sessions.spawn(async move {
                        let (reader, writer) = stream.into_split();
                        match serve_connection(shared, reader, writer).await {
                            Ok(()) => info!(peer = %peer, "connection closed"),
                            Err(e) => warn!(peer = %peer, "connection error: {e}"),
                        }
                    });
                }
                _ = &mut shutdown => break,
            }
        }

        drop(self.listener);
        info!("shutting down, draining sessions");
        let drain = async {
            while sessions.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("grace period elapsed, dropping remaining connections");
            sessions.abort_all();
        }
        info!("server stopped");
        Ok(())
    }
}
