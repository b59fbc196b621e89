//! History command tests: log, locations, location segments

mod common;

use common::*;
use gitsvn_core::testutil::{self, TreeOp};
use gitsvn_protocol::Item;

/// Read streamed entries up to the bare `done` word.
async fn read_until_done(client: &mut TestClient) -> Vec<Item> {
    let mut items = Vec::new();
    loop {
        let item = client.read_item().await;
        if item == Item::Word("done".to_string()) {
            return items;
        }
        items.push(item);
    }
}

#[tokio::test]
async fn test_location_segments_follow_renames() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "add a", &[("a", "same content")]).await;
    testutil::apply(
        &repo,
        "master",
        "rename a to b",
        &[TreeOp::Delete("a".into()), TreeOp::put("b", "same content")],
    )
    .await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client
        .send("( get-location-segments ( 1:b ( 2 ) ( 2 ) ( 0 ) ) ) ")
        .await;
    let entries = read_until_done(&mut client).await;
    success_body(&client.read_item().await);

    // Post-rename era, then the pre-rename history of /a.
    assert_eq!(
        entries[0],
        Item::List(vec![
            Item::Number(2),
            Item::Number(2),
            Item::List(vec![Item::Bytes(b"b".to_vec())]),
        ])
    );
    assert_eq!(
        entries[1],
        Item::List(vec![
            Item::Number(1),
            Item::Number(1),
            Item::List(vec![Item::Bytes(b"a".to_vec())]),
        ])
    );
}

#[tokio::test]
async fn test_location_segments_missing_path() {
    let shared = test_shared().await;
    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client
        .send("( get-location-segments ( 5:ghost ( 0 ) ( 0 ) ( 0 ) ) ) ")
        .await;
    let entries = read_until_done(&mut client).await;
    assert!(entries.is_empty());
    assert_eq!(failure_code(&client.read_item().await), 160013);
}

#[tokio::test]
async fn test_get_locations_maps_old_revisions() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "add a", &[("a", "identical")]).await;
    testutil::apply(
        &repo,
        "master",
        "rename",
        &[TreeOp::Delete("a".into()), TreeOp::put("b", "identical")],
    )
    .await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( get-locations ( 1:b 2 ( 1 2 ) ) ) ").await;
    let entries = read_until_done(&mut client).await;
    success_body(&client.read_item().await);

    let mut located: Vec<(u64, String)> = entries
        .iter()
        .map(|entry| {
            let Item::List(fields) = entry else { panic!() };
            let Item::Number(rev) = fields[0] else { panic!() };
            (rev, as_string(&fields[1]))
        })
        .collect();
    located.sort();
    assert_eq!(
        located,
        vec![(1, "/a".to_string()), (2, "/b".to_string())]
    );
}

#[tokio::test]
async fn test_log_streams_entries_newest_first() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "first change", &[("a", "1")]).await;
    testutil::commit_files(&repo, "master", "second change", &[("b", "2")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( log ( ( ) ( 2 ) ( 1 ) true false ) ) ").await;
    let entries = read_until_done(&mut client).await;
    success_body(&client.read_item().await);

    assert_eq!(entries.len(), 2);
    let Item::List(first) = &entries[0] else { panic!() };
    // ( ( changed-paths ) rev ( author ) ( date ) ( message ) ... )
    assert_eq!(first[1], Item::Number(2));
    let Item::List(changed) = &first[0] else { panic!() };
    let Item::List(change) = &changed[0] else { panic!() };
    assert_eq!(as_string(&change[0]), "/b");
    assert_eq!(change[1], Item::Word("A".to_string()));
    let Item::List(message) = &first[4] else { panic!() };
    assert_eq!(as_string(&message[0]), "second change");

    let Item::List(second) = &entries[1] else { panic!() };
    assert_eq!(second[1], Item::Number(1));
}

#[tokio::test]
async fn test_log_filters_by_target_path() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(&repo, "master", "touch a", &[("a", "1")]).await;
    testutil::commit_files(&repo, "master", "touch b", &[("b", "2")]).await;
    testutil::commit_files(&repo, "master", "touch a again", &[("a", "3")]).await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client
        .send("( log ( ( 1:a ) ( 3 ) ( 0 ) false false ) ) ")
        .await;
    let entries = read_until_done(&mut client).await;
    success_body(&client.read_item().await);

    let revs: Vec<&Item> = entries
        .iter()
        .map(|entry| {
            let Item::List(fields) = entry else { panic!() };
            &fields[1]
        })
        .collect();
    assert_eq!(revs, vec![&Item::Number(3), &Item::Number(1)]);
}

#[tokio::test]
async fn test_log_respects_limit() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    for rev in 1..=4 {
        testutil::commit_files(&repo, "master", "change", &[("f", &rev.to_string())]).await;
    }

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client
        .send("( log ( ( ) ( 4 ) ( 0 ) false false 2 ) ) ")
        .await;
    let entries = read_until_done(&mut client).await;
    success_body(&client.read_item().await);
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn test_get_iprops_walks_ancestors() {
    let shared = test_shared().await;
    let repo = repository(&shared);
    testutil::commit_files(
        &repo,
        "master",
        "props",
        &[(".gitignore", "*.tmp\n"), ("dir/file", "x")],
    )
    .await;

    let mut client = TestClient::connect(shared).await;
    client.authenticate_anonymous().await;

    client.send("( get-iprops ( 8:dir/file ( 1 ) ) ) ").await;
    let body = success_body(&client.read_item().await);
    let Item::List(iprops) = &body[0] else { panic!() };
    assert_eq!(iprops.len(), 1);
    let Item::List(entry) = &iprops[0] else { panic!() };
    assert_eq!(as_string(&entry[0]), "");
    let Item::List(props) = &entry[1] else { panic!() };
    let Item::List(pair) = &props[0] else { panic!() };
    assert_eq!(as_string(&pair[0]), "svn:ignore");
}
