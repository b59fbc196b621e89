//! Session handshake and single-round command tests

mod common;

use common::*;
use gitsvn_core::testutil;
use gitsvn_protocol::Item;

#[tokio::test]
async fn test_check_path_on_empty_repository() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( check-path ( 0: ( ) ) ) ").await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    assert_eq!(body, vec![Item::Word("dir".to_string())]);
}

#[tokio::test]
async fn test_get_latest_rev_on_initialized_repository() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( get-latest-rev ( ) ) ").await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    assert_eq!(body, vec![Item::Number(0)]);
}

#[tokio::test]
async fn test_unknown_command_keeps_session_alive() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( frobnicate ( 3:abc ) ) ").await;
    let reply = client.read_item().await;
    assert_eq!(failure_code(&reply), 210001);

    client.send("( get-latest-rev ( ) ) ").await;
    let reply = client.read_item().await;
    success_body(&reply);
}

#[tokio::test]
async fn test_plain_authentication_rejects_bad_password() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;

    let auth_request = client.read_item().await;
    success_body(&auth_request);
    use base64::Engine;
    let token = base64::engine::general_purpose::STANDARD.encode("\0alice\0wrong");
    client
        .send(&format!("( PLAIN ( {}:{} ) ) ", token.len(), token))
        .await;
    let reply = client.read_item().await;
    let Item::List(list) = &reply else { panic!() };
    assert_eq!(list.first(), Some(&Item::Word("failure".to_string())));

    // Retry with good credentials on the same connection.
    let token = base64::engine::general_purpose::STANDARD.encode("\0alice\0secret");
    client
        .send(&format!("( PLAIN ( {}:{} ) ) ", token.len(), token))
        .await;
    let ok = client.read_item().await;
    success_body(&ok);
    let announce = client.read_item().await;
    success_body(&announce);
}

#[tokio::test]
async fn test_htpasswd_users_file_authentication() {
    use gitsvn_server::config::{Config, RepoConfig};
    use gitsvn_server::server::{build_shared, initialize_repositories};

    let dir = tempfile::tempdir().unwrap();
    let htpasswd = dir.path().join("htpasswd");
    // {SHA} value for "password"
    std::fs::write(&htpasswd, "carol:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n").unwrap();

    let mut config = Config::default();
    config.anonymous_read = true;
    config.users_file = Some(htpasswd);
    config.repositories.insert(
        "repo".to_string(),
        RepoConfig {
            path: None,
            prefix: None,
            branch: "master".to_string(),
            rename_detection: true,
        },
    );
    let shared = build_shared(config).unwrap();
    initialize_repositories(&shared).await.unwrap();

    let mut client = TestClient::connect(shared).await;
    client.authenticate("carol", "password").await;

    client.send("( get-latest-rev ( ) ) ").await;
    success_body(&client.read_item().await);
}

#[tokio::test]
async fn test_unknown_repository_is_refused() {
    let shared = test_shared().await;
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let (server_read, server_write) = tokio::io::split(server_io);
    tokio::spawn(async move {
        let _ = gitsvn_server::session::serve_connection(shared, server_read, server_write).await;
    });
    let (client_read, mut client_write) = tokio::io::split(client_io);
    let mut parser = gitsvn_protocol::SvnParser::new(client_read);

    parser.read_item().await.unwrap();
    use tokio::io::AsyncWriteExt;
    let url = "svn://test/no-such-repo";
    client_write
        .write_all(format!("( 2 ( edit-pipeline ) {}:{} ) ", url.len(), url).as_bytes())
        .await
        .unwrap();
    let reply = parser.read_item().await.unwrap();
    assert_eq!(failure_code(&reply), 210005);
}

#[tokio::test]
async fn test_stat_and_get_file() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "add", &[("dir/file.txt", "content\n")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate("alice", "secret").await;

    client.send("( stat ( 12:dir/file.txt ( 1 ) ) ) ").await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    // ( ( ( kind size has-props created-rev ( date ) ( author ) ) ) )
    let Item::List(outer) = &body[0] else { panic!() };
    let Item::List(dirent) = &outer[0] else { panic!() };
    assert_eq!(dirent[0], Item::Word("file".to_string()));
    assert_eq!(dirent[1], Item::Number(8));
    assert_eq!(dirent[3], Item::Number(1));

    client
        .send("( get-file ( 12:dir/file.txt ( 1 ) true true ) ) ")
        .await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    let Item::List(md5) = &body[0] else { panic!() };
    assert_eq!(as_string(&md5[0]).len(), 32);
    // Contents: chunks ended by an empty string, then a trailing success.
    let mut content = Vec::new();
    loop {
        let chunk = client.read_item().await;
        let bytes = as_bytes(&chunk);
        if bytes.is_empty() {
            break;
        }
        content.extend_from_slice(&bytes);
    }
    assert_eq!(content, b"content\n");
    let trailer = client.read_item().await;
    success_body(&trailer);
}

#[tokio::test]
async fn test_stat_missing_path_fails_but_session_continues() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( stat ( 7:missing ( 0 ) ) ) ").await;
    let reply = client.read_item().await;
    assert_eq!(failure_code(&reply), 200009);

    client.send("( get-latest-rev ( ) ) ").await;
    success_body(&client.read_item().await);
}

#[tokio::test]
async fn test_get_dir_lists_entries() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "add", &[("a.txt", "a"), ("sub/b.txt", "b")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( get-dir ( 0: ( 1 ) false true ) ) ").await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    assert_eq!(body[0], Item::Number(1));
    let Item::List(entries) = &body[2] else { panic!() };
    let names: Vec<String> = entries
        .iter()
        .map(|entry| {
            let Item::List(fields) = entry else { panic!() };
            as_string(&fields[0])
        })
        .collect();
    assert_eq!(names, vec!["a.txt".to_string(), "sub".to_string()]);
}

#[tokio::test]
async fn test_rev_proplist_carries_commit_metadata() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "my message", &[("f", "x")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( rev-proplist ( 1 ) ) ").await;
    let reply = client.read_item().await;
    let body = success_body(&reply);
    let Item::List(props) = &body[0] else { panic!() };
    let mut found_log = false;
    for prop in props {
        let Item::List(pair) = prop else { panic!() };
        if as_string(&pair[0]) == "svn:log" {
            assert_eq!(as_string(&pair[1]), "my message");
            found_log = true;
        }
    }
    assert!(found_log);
}

#[tokio::test]
async fn test_reparent_moves_the_session_root() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "add", &[("sub/inner.txt", "x")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    let url = "svn://test/repo/sub";
    client
        .send(&format!("( reparent ( {}:{} ) ) ", url.len(), url))
        .await;
    success_body(&client.read_item().await);

    client.send("( check-path ( 9:inner.txt ( 1 ) ) ) ").await;
    let reply = client.read_item().await;
    assert_eq!(
        success_body(&reply),
        vec![Item::Word("file".to_string())]
    );

    // Outside the repository root is an error.
    let url = "svn://elsewhere/other";
    client
        .send(&format!("( reparent ( {}:{} ) ) ", url.len(), url))
        .await;
    assert_eq!(failure_code(&client.read_item().await), 125002);
}

#[tokio::test]
async fn test_get_dated_rev() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("f", "1")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    let date = "2100-01-01T00:00:00.000000Z";
    client
        .send(&format!("( get-dated-rev ( {}:{} ) ) ", date.len(), date))
        .await;
    let reply = client.read_item().await;
    assert_eq!(success_body(&reply), vec![Item::Number(1)]);
}
