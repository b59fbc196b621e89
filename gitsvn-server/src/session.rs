//! Client session engine
//!
//! Owns one client socket and drives the protocol state machine: capability
//! exchange, repository resolution, authentication, announce, then the
//! command loop. Pending steps are drained before every socket read.

use base64::Engine;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use gitsvn_core::error::codes;
use gitsvn_core::repository::{Branch, Repository, RepositoryMapping};
use gitsvn_core::users::{User, UserDb};
use gitsvn_core::{paths, SvnError};
use gitsvn_protocol::{Item, ItemReader, ProtocolError, SvnParser, SvnWriter, Token};

use crate::commands;
use crate::config::Config;
use crate::step::Step;

/// Protocol version this server speaks.
const PROTOCOL_VERSION: u64 = 2;

/// Errors leaving a command handler.
#[derive(Debug)]
pub enum ServerError {
    /// Semantic: reported to the client, session continues
    Svn(SvnError),
    /// Transport: the connection is closed
    Protocol(ProtocolError),
}

impl From<SvnError> for ServerError {
    fn from(err: SvnError) -> Self {
        ServerError::Svn(err)
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::Protocol(err)
    }
}

impl From<gitsvn_core::StorageError> for ServerError {
    fn from(err: gitsvn_core::StorageError) -> Self {
        ServerError::Svn(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// State shared by every session.
pub struct SharedContext {
    pub config: Config,
    pub mapping: RepositoryMapping,
    pub users: Arc<dyn UserDb>,
}

/// One connected client.
pub struct Session<R, W> {
    pub parser: SvnParser<R>,
    pub writer: SvnWriter<W>,
    shared: Arc<SharedContext>,
    repo: Arc<Repository>,
    branch_name: String,
    base_url: String,
    /// Current parent path relative to the branch root; `reparent` moves it
    parent: String,
    user: User,
    capabilities: HashSet<String>,
    pub(crate) steps: Vec<Step>,
}

/// Serve one accepted connection end to end.
///
/// Transport errors come back as `Err`; a clean client disconnect is `Ok`.
pub async fn serve_connection<R, W>(
    shared: Arc<SharedContext>,
    reader: R,
    writer: W,
) -> std::result::Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    let mut parser = SvnParser::new(reader);
    let mut writer = SvnWriter::new(writer);

    send_greeting(&shared, &mut writer).await?;
    let client = read_client_info(&shared, &mut parser).await?;
    if client.version != PROTOCOL_VERSION {
        send_plain_failure(
            &mut writer,
            codes::RA_SVN_BAD_VERSION,
            &format!(
                "Unsupported protocol version: {} (expected: {PROTOCOL_VERSION})",
                client.version
            ),
        )
        .await?;
        return Ok(());
    }

    let Some((info, parent)) = shared.mapping.resolve(&client.url) else {
        send_plain_failure(
            &mut writer,
            codes::RA_SVN_REPOS_NOT_FOUND,
            &format!("Repository not found: {}", client.url),
        )
        .await?;
        return Ok(());
    };

    let mut session = Session {
        parser,
        writer,
        shared: shared.clone(),
        repo: info.repository,
        branch_name: info.branch,
        base_url: info.base_url,
        parent,
        user: User::anonymous(),
        capabilities: client.capabilities,
        steps: Vec::new(),
    };

    let auth_timeout = Duration::from_secs(shared.config.auth_timeout_secs.max(1));
    match tokio::time::timeout(auth_timeout, session.authenticate()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!("authentication timed out");
            return Ok(());
        }
    }

    let branch = session.repo.branch(&session.branch_name).map_err(fatal)?;
    session.repo.update_revisions(branch).await.map_err(fatal)?;
    session.send_announce().await?;
    session.command_loop().await
}

fn fatal(err: SvnError) -> ProtocolError {
    ProtocolError::Message(err.message)
}

struct ClientInfo {
    version: u64,
    capabilities: HashSet<String>,
    url: String,
}

async fn send_greeting<W: AsyncWrite + Unpin>(
    shared: &SharedContext,
    writer: &mut SvnWriter<W>,
) -> std::result::Result<(), ProtocolError> {
    writer
        .list_begin()
        .word("success")
        .list_begin()
        .number(PROTOCOL_VERSION)
        .number(PROTOCOL_VERSION)
        .list_begin()
        .list_end()
        .list_begin()
        .word("edit-pipeline")
        .word("absent-entries")
        .word("depth")
        .word("inherited-props")
        .word("log-revprops");
    if shared.config.compression {
        writer.word("svndiff1");
    }
    writer.list_end().list_end().list_end();
    writer.flush().await
}

async fn read_client_info<R: AsyncRead + Unpin>(
    _shared: &SharedContext,
    parser: &mut SvnParser<R>,
) -> std::result::Result<ClientInfo, ProtocolError> {
    let item = parser.read_item().await?;
    let Item::List(items) = item else {
        return Err(ProtocolError::Message("malformed client greeting".into()));
    };
    let mut reader = ItemReader::new(&items);
    let version = reader.read_number()?;
    let capabilities = reader.read_string_list()?.into_iter().collect();
    let url = reader.read_string()?;
    Ok(ClientInfo {
        version,
        capabilities,
        url,
    })
}

async fn send_plain_failure<W: AsyncWrite + Unpin>(
    writer: &mut SvnWriter<W>,
    code: u32,
    message: &str,
) -> std::result::Result<(), ProtocolError> {
    writer
        .list_begin()
        .word("failure")
        .list_begin()
        .list_begin()
        .number(code as u64)
        .string(message)
        .string("")
        .number(0)
        .list_end()
        .list_end()
        .list_end();
    writer.flush().await
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + Sync,
{
    // ── Accessors used by command handlers ─────────────────────

    pub fn repo_arc(&self) -> Arc<Repository> {
        self.repo.clone()
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn branch(&self) -> Result<&Branch> {
        Ok(self.repo.branch(&self.branch_name)?)
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }

    /// Compressed delta windows when both sides agreed to svndiff1.
    pub fn compression_enabled(&self) -> bool {
        self.shared.config.compression && self.has_capability("svndiff1")
    }

    /// Join a command-local path onto the session parent.
    pub fn repository_path(&self, local: &str) -> String {
        paths::join(&self.parent, &paths::normalize(local))
    }

    /// Map a client URL into a branch-root-relative path.
    pub fn path_from_url(&self, url: &str) -> Result<String> {
        let url = url.trim_end_matches('/');
        match url.strip_prefix(self.base_url.trim_end_matches('/')) {
            Some(rest) if rest.is_empty() => Ok(String::new()),
            Some(rest) if rest.starts_with('/') => Ok(paths::normalize(rest)),
            _ => Err(ServerError::Svn(SvnError::new(
                codes::BAD_URL,
                format!("URL is outside repository: {url} (base: {})", self.base_url),
            ))),
        }
    }

    pub fn set_parent_from_url(&mut self, url: &str) -> Result<()> {
        self.parent = self.path_from_url(url)?;
        Ok(())
    }

    pub fn check_read(&self, path: &str) -> Result<()> {
        Ok(self.repo.access().check_read(&self.user, path)?)
    }

    pub fn check_write(&self, path: &str) -> Result<()> {
        Ok(self.repo.access().check_write(&self.user, path)?)
    }

    pub fn can_read(&self, path: &str) -> bool {
        self.repo.access().can_read(&self.user, path)
    }

    /// Latest revision, refreshing the branch mapping first.
    pub async fn latest_revision(&self) -> Result<u64> {
        let branch = self.repo.branch(&self.branch_name)?;
        self.repo.update_revisions(branch).await?;
        Ok(self.repo.latest_revision(branch).await)
    }

    /// Resolve an optional revision argument to a concrete revision.
    pub async fn revision_or_latest(&self, rev: Option<u64>) -> Result<u64> {
        match rev {
            Some(rev) => Ok(rev),
            None => self.latest_revision().await,
        }
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    // ── Wire helpers ───────────────────────────────────────────

    /// `( success ( ) )`
    pub async fn send_success_empty(&mut self) -> Result<()> {
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_end()
            .list_end();
        Ok(self.writer.flush().await?)
    }

    /// Empty auth request sent ahead of delta and commit replies.
    pub async fn send_auth_request(&mut self) -> Result<()> {
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .list_begin()
            .list_end()
            .string("")
            .list_end()
            .list_end();
        Ok(self.writer.flush().await?)
    }

    /// `( failure ( ( code msg file line ) ) )`
    pub async fn send_failure(&mut self, err: &SvnError) -> Result<()> {
        self.writer
            .list_begin()
            .word("failure")
            .list_begin()
            .list_begin()
            .number(err.code as u64)
            .string(&err.message)
            .string("")
            .number(0)
            .list_end()
            .list_end()
            .list_end();
        Ok(self.writer.flush().await?)
    }

    // ── State machine ──────────────────────────────────────────

    async fn authenticate(&mut self) -> std::result::Result<(), ProtocolError> {
        let allow_anonymous = self
            .repo
            .access()
            .can_read(&User::anonymous(), &self.parent);
        let mut mechanisms = Vec::new();
        if allow_anonymous {
            mechanisms.push("ANONYMOUS");
        }
        mechanisms.push("PLAIN");

        let realm = if self.shared.config.realm.is_empty() {
            self.repo.uuid().to_string()
        } else {
            self.shared.config.realm.clone()
        };

        self.writer.list_begin().word("success").list_begin().list_begin();
        for mech in &mechanisms {
            self.writer.word(mech);
        }
        self.writer.list_end().string(&realm).list_end().list_end();
        self.writer.flush().await?;

        loop {
            let Item::List(items) = self.parser.read_item().await? else {
                return Err(ProtocolError::Message("malformed auth response".into()));
            };
            let mut reader = ItemReader::new(&items);
            let mech = reader.read_word()?;
            let token = read_auth_token(&items[1..]);

            if !mechanisms.contains(&mech.as_str()) {
                self.auth_failure(&format!("unknown auth type: {mech}")).await?;
                continue;
            }
            match mech.as_str() {
                "ANONYMOUS" => {
                    self.user = User::anonymous();
                }
                "PLAIN" => {
                    let Some(user) = self.check_plain_token(token.as_deref()).await else {
                        self.auth_failure("incorrect credentials").await?;
                        continue;
                    };
                    self.user = user;
                }
                _ => {
                    self.auth_failure(&format!("unknown auth type: {mech}")).await?;
                    continue;
                }
            }
            self.writer
                .list_begin()
                .word("success")
                .list_begin()
                .list_end()
                .list_end();
            self.writer.flush().await?;
            info!(user = %self.user, "authenticated");
            return Ok(());
        }
    }

    /// PLAIN token: base64 of `authzid \0 user \0 password`.
    async fn check_plain_token(&self, token: Option<&str>) -> Option<User> {
        let token = token?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(token.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let mut parts = decoded.split('\0');
        let _authzid = parts.next()?;
        let username = parts.next()?;
        let password = parts.next()?;
        self.shared.users.authenticate(username, password).await
    }

    async fn auth_failure(&mut self, message: &str) -> std::result::Result<(), ProtocolError> {
        self.writer
            .list_begin()
            .word("failure")
            .list_begin()
            .string(message)
            .list_end()
            .list_end();
        self.writer.flush().await
    }

    async fn send_announce(&mut self) -> std::result::Result<(), ProtocolError> {
        let uuid = self.repo.uuid().to_string();
        let url = self.base_url.clone();
        self.writer
            .list_begin()
            .word("success")
            .list_begin()
            .string(&uuid)
            .string(&url)
            .list_begin()
            .list_end()
            .list_end()
            .list_end();
        self.writer.flush().await
    }

    async fn command_loop(&mut self) -> std::result::Result<(), ProtocolError> {
        loop {
            // Drain pending steps before touching the socket again.
            if let Some(step) = self.steps.pop() {
                match step.process(self).await {
                    Ok(()) => {}
                    Err(ServerError::Svn(err)) => self.report_command_error(err).await?,
                    Err(ServerError::Protocol(err)) => return Err(err),
                }
                continue;
            }

            let token = match self.read_command_token().await {
                Ok(token) => token,
                // A disconnect between commands is a normal end of session.
                Err(ProtocolError::UnexpectedEof) => return Ok(()),
                Err(err) => return Err(err),
            };
            if token != Token::ListBegin {
                return Err(ProtocolError::UnexpectedToken {
                    expected: "(",
                    found: token.describe(),
                });
            }
            let cmd = self.parser.read_word().await?;
            let args = self.parser.read_list_items().await?;
            debug!(command = %cmd, "received command");

            match commands::dispatch(self, &cmd, &args).await {
                Ok(()) => {}
                Err(ServerError::Svn(err)) => self.report_command_error(err).await?,
                Err(ServerError::Protocol(err)) => return Err(err),
            }
        }
    }

    async fn read_command_token(&mut self) -> std::result::Result<Token, ProtocolError> {
        let idle = self.shared.config.idle_timeout_secs;
        if idle == 0 {
            return self.parser.read_token().await;
        }
        match tokio::time::timeout(Duration::from_secs(idle), self.parser.read_token()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Message("idle timeout".into())),
        }
    }

    async fn report_command_error(
        &mut self,
        err: SvnError,
    ) -> std::result::Result<(), ProtocolError> {
        if err.is_warning() {
            warn!(code = err.code, "command execution error: {}", err.message);
        } else {
            error!(code = err.code, "command execution error: {}", err.message);
        }
        self.send_failure(&err).await.map_err(|e| match e {
            ServerError::Protocol(p) => p,
            ServerError::Svn(s) => ProtocolError::Message(s.message),
        })
    }
}

/// Auth token may be absent, a bare string, or wrapped in a tuple.
fn read_auth_token(items: &[Item]) -> Option<String> {
    match items.first()? {
        Item::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
        Item::List(inner) => match inner.first()? {
            Item::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        },
        _ => None,
    }
}
