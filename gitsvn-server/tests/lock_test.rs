//! Lock command tests

mod common;

use common::*;
use gitsvn_core::testutil;
use gitsvn_protocol::Item;

/// Token field of a lockdesc `( path token owner ( comment ) created ( ) )`.
fn lock_token(body: &[Item]) -> String {
    let Item::List(desc) = &body[0] else {
        panic!("expected lockdesc, got {body:?}")
    };
    as_string(&desc[1])
}

async fn acquire_lock(client: &mut TestClient, path: &str, steal: bool) -> Item {
    client
        .send(&format!(
            "( lock ( {}:{} ( ) {} ( ) ) ) ",
            path.len(),
            path,
            if steal { "true" } else { "false" }
        ))
        .await;
    client.read_item().await
}

#[tokio::test]
async fn test_lock_contention_and_steal() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("a", "content")]).await;

    let mut alice = TestClient::connect(shared.clone()).await;
    alice.authenticate("alice", "secret").await;
    let mut bob = TestClient::connect(shared).await;
    bob.authenticate("bob", "hunter2").await;

    // Alice locks /a.
    let reply = acquire_lock(&mut alice, "a", false).await;
    let body = success_body(&reply);
    let alice_token = lock_token(&body);
    assert!(alice_token.starts_with("opaquelocktoken:"));

    // Bob cannot lock without steal.
    let reply = acquire_lock(&mut bob, "a", false).await;
    assert_eq!(failure_code(&reply), 160035);

    // With steal the lock changes hands and the old token dies.
    let reply = acquire_lock(&mut bob, "a", true).await;
    let body = success_body(&reply);
    let bob_token = lock_token(&body);
    assert_ne!(bob_token, alice_token);

    alice
        .send(&format!(
            "( unlock ( 1:a ( {}:{} ) false ) ) ",
            alice_token.len(),
            alice_token
        ))
        .await;
    assert_eq!(failure_code(&alice.read_item().await), 160037);
}

#[tokio::test]
async fn test_get_lock_and_get_locks() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("dir/a", "1"), ("dir/b", "2")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate("alice", "secret").await;

    success_body(&acquire_lock(&mut client, "dir/a", false).await);
    success_body(&acquire_lock(&mut client, "dir/b", false).await);

    client.send("( get-lock ( 5:dir/a ) ) ").await;
    let body = success_body(&client.read_item().await);
    let Item::List(held) = &body[0] else { panic!() };
    let Item::List(desc) = &held[0] else { panic!() };
    assert_eq!(as_string(&desc[2]), "alice");

    client.send("( get-locks ( 3:dir ) ) ") .await;
    let body = success_body(&client.read_item().await);
    let Item::List(locks) = &body[0] else { panic!() };
    assert_eq!(locks.len(), 2);

    // No lock on an unlocked path.
    client.send("( get-lock ( 4:none ) ) ").await;
    let body = success_body(&client.read_item().await);
    assert_eq!(body[0], Item::List(vec![]));
}

#[tokio::test]
async fn test_unlock_requires_matching_token() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("a", "x")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate("alice", "secret").await;

    let body = success_body(&acquire_lock(&mut client, "a", false).await);
    let token = lock_token(&body);

    client.send("( unlock ( 1:a ( 9:bad-token ) false ) ) ").await;
    assert_eq!(failure_code(&client.read_item().await), 160037);

    client
        .send(&format!("( unlock ( 1:a ( {}:{} ) false ) ) ", token.len(), token))
        .await;
    success_body(&client.read_item().await);

    client.send("( get-lock ( 1:a ) ) ").await;
    let body = success_body(&client.read_item().await);
    assert_eq!(body[0], Item::List(vec![]));
}

#[tokio::test]
async fn test_lock_missing_path_fails() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate("alice", "secret").await;

    let reply = acquire_lock(&mut client, "ghost", false).await;
    assert_eq!(failure_code(&reply), 160013);
}

#[tokio::test]
async fn test_lock_many_streams_per_path_results() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("a", "1"), ("b", "2")]).await;

    let mut bob = TestClient::connect(shared.clone()).await;
    bob.authenticate("bob", "hunter2").await;
    success_body(&acquire_lock(&mut bob, "b", false).await);

    let mut alice = TestClient::connect(shared).await;
    alice.authenticate("alice", "secret").await;
    alice
        .send("( lock-many ( ( ) false ( ( 1:a ( ) ) ( 1:b ( ) ) ) ) ) ")
        .await;

    // Per-path results: a succeeds, b is already locked.
    let first = alice.read_item().await;
    let body = success_body(&first);
    let Item::List(desc) = &body[0] else { panic!() };
    assert_eq!(as_string(&desc[0]), "/a");
    let second = alice.read_item().await;
    assert_eq!(failure_code(&second), 160035);

    assert_eq!(alice.read_item().await, Item::Word("done".to_string()));
    success_body(&alice.read_item().await);
}

#[tokio::test]
async fn test_commit_against_locked_path_requires_token() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "r1", &[("locked.txt", "v1")]).await;

    let mut alice = TestClient::connect(shared.clone()).await;
    alice.authenticate("alice", "secret").await;
    let body = success_body(&acquire_lock(&mut alice, "locked.txt", false).await);
    let token = lock_token(&body);

    // Bob's commit against the locked path fails: he is not the owner.
    let mut bob = TestClient::connect(shared.clone()).await;
    bob.authenticate("bob", "hunter2").await;
    bob.send("( commit ( 6:hijack ) ) ").await;
    success_body(&bob.read_item().await);
    success_body(&bob.read_item().await);
    bob.send("( open-root ( ( 1 ) 2:d0 ) ) ").await;
    bob.send("( open-file ( 10:locked.txt 2:d0 2:f1 ( 1 ) ) ) ").await;
    bob.send("( close-file ( 2:f1 ( ) ) ) ").await;
    bob.send("( close-dir ( 2:d0 ) ) ").await;
    bob.send("( close-edit ( ) ) ").await;
    assert_eq!(failure_code(&bob.read_item().await), 160039);

    // Alice presents her token and the commit releases the lock.
    let mut alice2 = TestClient::connect(shared).await;
    alice2.authenticate("alice", "secret").await;
    alice2
        .send(&format!(
            "( commit ( 4:mine ( ( 10:locked.txt {}:{} ) ) false ) ) ",
            token.len(),
            token
        ))
        .await;
    success_body(&alice2.read_item().await);
    success_body(&alice2.read_item().await);
    alice2.send("( open-root ( ( 1 ) 2:d0 ) ) ").await;
    alice2
        .send("( open-file ( 10:locked.txt 2:d0 2:f1 ( 1 ) ) ) ")
        .await;
    alice2.send("( close-file ( 2:f1 ( ) ) ) ").await;
    alice2.send("( close-dir ( 2:d0 ) ) ").await;
    alice2.send("( close-edit ( ) ) ").await;
    let body = success_body(&alice2.read_item().await);
    assert_eq!(body[0], Item::Number(2));

    alice2.send("( get-lock ( 10:locked.txt ) ) ").await;
    let body = success_body(&alice2.read_item().await);
    assert_eq!(body[0], Item::List(vec![]), "lock released after commit");
}
