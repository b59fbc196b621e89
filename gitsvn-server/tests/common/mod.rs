//! In-process test harness
//!
//! Spins up a session engine over a duplex pipe and drives it with a
//! minimal protocol client, so whole command round-trips run without a
//! socket.

#![allow(dead_code)]

use base64::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use gitsvn_protocol::{Item, SvnParser};
use gitsvn_server::config::{Config, RepoConfig, UserConfig};
use gitsvn_server::server::{build_shared, initialize_repositories};
use gitsvn_server::session::{serve_connection, SharedContext};

pub const TEST_URL: &str = "svn://test/repo";

/// Shared context with one in-memory repository and two accounts.
pub async fn test_shared() -> Arc<SharedContext> {
    let mut config = Config::default();
    config.anonymous_read = true;
    config.repositories.insert(
        "repo".to_string(),
        RepoConfig {
            path: None,
            prefix: None,
            branch: "master".to_string(),
            rename_detection: true,
        },
    );
    let mut users = BTreeMap::new();
    users.insert(
        "alice".to_string(),
        UserConfig {
            password: "plain:secret".to_string(),
            real_name: Some("Alice".to_string()),
            email: None,
        },
    );
    users.insert(
        "bob".to_string(),
        UserConfig {
            password: "plain:hunter2".to_string(),
            real_name: Some("Bob".to_string()),
            email: None,
        },
    );
    config.users = users;
    let shared = build_shared(config).unwrap();
    initialize_repositories(&shared).await.unwrap();
    shared
}

/// The repository registered by [`test_shared`].
pub fn repository(shared: &SharedContext) -> Arc<gitsvn_core::Repository> {
    shared.mapping.repositories().next().unwrap().clone()
}

pub struct TestClient {
    pub parser: SvnParser<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    server: tokio::task::JoinHandle<()>,
}

impl TestClient {
    /// Connect and run the greeting exchange; authentication comes next.
    pub async fn connect(shared: Arc<SharedContext>) -> Self {
        Self::connect_to(shared, TEST_URL).await
    }

    pub async fn connect_to(shared: Arc<SharedContext>, url: &str) -> Self {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(async move {
            let _ = serve_connection(shared, server_read, server_write).await;
        });
        let (client_read, client_write) = tokio::io::split(client_io);
        let mut client = Self {
            parser: SvnParser::new(client_read),
            writer: client_write,
            server,
        };

        // Greeting: ( success ( minver maxver ( ) ( caps... ) ) )
        let greeting = client.read_item().await;
        let caps = success_body(&greeting);
        assert!(matches!(caps[0], Item::Number(2)));

        client
            .send(&format!(
                "( 2 ( edit-pipeline svndiff1 depth ) {}:{} ) ",
                url.len(),
                url
            ))
            .await;
        client
    }

    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_bytes(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn read_item(&mut self) -> Item {
        self.parser.read_item().await.expect("read item")
    }

    pub async fn read_word(&mut self) -> String {
        self.parser.read_word().await.expect("read word")
    }

    async fn finish_auth(&mut self) {
        // ( success ( ) ) for the mechanism, then the announce.
        let ok = self.read_item().await;
        success_body(&ok);
        let announce = self.read_item().await;
        let body = success_body(&announce);
        assert!(matches!(body[0], Item::Bytes(_)), "uuid expected");
    }

    /// PLAIN authentication with the given credentials.
    pub async fn authenticate(&mut self, username: &str, password: &str) {
        let auth_request = self.read_item().await;
        success_body(&auth_request);
        let token =
            base64::engine::general_purpose::STANDARD.encode(format!("\0{username}\0{password}"));
        self.send(&format!("( PLAIN ( {}:{} ) ) ", token.len(), token))
            .await;
        self.finish_auth().await;
    }

    pub async fn authenticate_anonymous(&mut self) {
        let auth_request = self.read_item().await;
        success_body(&auth_request);
        self.send("( ANONYMOUS ( ) ) ").await;
        self.finish_auth().await;
    }

    /// Editor items streamed by a delta command, up to and including
    /// `close-edit`; the leading empty auth request is consumed here.
    pub async fn read_edit_stream(&mut self) -> Vec<Item> {
        let auth_request = self.read_item().await;
        success_body(&auth_request);
        let mut items = Vec::new();
        loop {
            let item = self.read_item().await;
            let done = command_word(&item) == Some("close-edit".to_string());
            items.push(item);
            if done {
                return items;
            }
        }
    }
}

/// Unwrap `( success ( ... ) )`, returning the inner items.
pub fn success_body(item: &Item) -> Vec<Item> {
    let Item::List(outer) = item else {
        panic!("expected response list, got {item:?}");
    };
    assert_eq!(
        outer.first(),
        Some(&Item::Word("success".to_string())),
        "expected success, got {item:?}"
    );
    let Some(Item::List(body)) = outer.get(1) else {
        panic!("malformed response body: {item:?}");
    };
    body.clone()
}

/// Unwrap `( failure ( ( code ... ) ) )`, returning the first error code.
pub fn failure_code(item: &Item) -> u64 {
    let Item::List(outer) = item else {
        panic!("expected response list, got {item:?}");
    };
    assert_eq!(
        outer.first(),
        Some(&Item::Word("failure".to_string())),
        "expected failure, got {item:?}"
    );
    let Some(Item::List(errors)) = outer.get(1) else {
        panic!("malformed failure body: {item:?}");
    };
    let Some(Item::List(first)) = errors.first() else {
        panic!("empty failure body: {item:?}");
    };
    match first.first() {
        Some(Item::Number(code)) => *code,
        other => panic!("missing error code: {other:?}"),
    }
}

/// The command word of an editor item `( word ( args ) )`.
pub fn command_word(item: &Item) -> Option<String> {
    let Item::List(list) = item else { return None };
    match list.first() {
        Some(Item::Word(word)) => Some(word.clone()),
        _ => None,
    }
}

/// Arguments of an editor item `( word ( args ) )`.
pub fn command_args(item: &Item) -> Vec<Item> {
    let Item::List(list) = item else {
        panic!("not a command: {item:?}")
    };
    match list.get(1) {
        Some(Item::List(args)) => args.clone(),
        _ => Vec::new(),
    }
}

/// Byte-string payload of an item.
pub fn as_bytes(item: &Item) -> Vec<u8> {
    match item {
        Item::Bytes(bytes) => bytes.clone(),
        other => panic!("expected byte string, got {other:?}"),
    }
}

pub fn as_string(item: &Item) -> String {
    String::from_utf8(as_bytes(item)).unwrap()
}
