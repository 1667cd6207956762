use plume_core::{RecordSignature, Tag};

use super::*;

fn record(n: u8, author_n: u8, created_at: u64, tags: Vec<Tag>) -> Record {
    Record::builder()
        .id(RecordId::from_bytes([n; 32]))
        .author(AuthorId::from_bytes([author_n; 32]))
        .created_at(Timestamp(created_at))
        .tags(tags)
        .sig(RecordSignature::from_bytes([1; 64]))
        .build()
}

#[test]
fn relay_url_is_validated_and_normalized() {
    let url = RelayUrl::from_str("wss://relay.example.com/").expect("valid");
    assert_eq!(url.as_str(), "wss://relay.example.com");
    assert_eq!(url, RelayUrl::from_str(" wss://RELAY.example.com ").expect("valid"));

    assert!(RelayUrl::from_str("ws://localhost:7777").is_ok());
    assert!(matches!(
        RelayUrl::from_str("https://relay.example.com"),
        Err(RelayUrlError::Scheme { .. })
    ));
    assert!(matches!(
        RelayUrl::from_str("not a url"),
        Err(RelayUrlError::Parse { .. })
    ));
}

#[test]
fn relay_hints_are_merged_without_duplicates() {
    let sources = vec![RelayUrl::from_str("wss://a.example").expect("valid")];

    let merged = merge_relay_hints(
        &sources,
        ["wss://a.example/", "wss://b.example", "garbage", "wss://b.example"],
    );

    assert_eq!(
        merged.iter().map(RelayUrl::as_str).collect::<Vec<_>>(),
        vec!["wss://a.example", "wss://b.example"]
    );
}

#[test]
fn query_matches_with_inclusive_bounds() {
    let r = record(1, 2, 500, vec![]);

    assert!(FeedQuery::default().matches(&r));
    assert!(
        FeedQuery {
            since: Some(Timestamp(500)),
            until: Some(Timestamp(500)),
            ..Default::default()
        }
        .matches(&r)
    );
    assert!(
        !FeedQuery {
            since: Some(Timestamp(501)),
            ..Default::default()
        }
        .matches(&r)
    );
    assert!(
        !FeedQuery {
            authors: vec![AuthorId::from_bytes([3; 32])],
            ..Default::default()
        }
        .matches(&r)
    );
    assert!(
        !FeedQuery {
            kinds: vec![RecordKind::METADATA],
            ..Default::default()
        }
        .matches(&r)
    );
}

#[test]
fn query_matches_references() {
    let parent = RecordId::from_bytes([9; 32]);
    let reply = record(1, 2, 5, vec![Tag::new(["e".to_owned(), parent.to_string()])]);
    let other = record(3, 2, 5, vec![]);

    let query = FeedQuery {
        references: vec![parent],
        ..Default::default()
    };
    assert!(query.matches(&reply));
    assert!(!query.matches(&other));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn subscription_delivers_in_order_and_closes() {
    let (tx, mut sub) = Subscription::channel(4);

    tx.send(StreamMessage::Record(record(1, 1, 1, vec![])))
        .await
        .expect("open");
    tx.send(StreamMessage::EndOfStream).await.expect("open");
    drop(tx);

    assert!(matches!(sub.recv().await, Some(StreamMessage::Record(_))));
    assert_eq!(sub.recv().await, Some(StreamMessage::EndOfStream));
    assert_eq!(sub.recv().await, None);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn unsubscribe_stops_producers() {
    let (tx, sub) = Subscription::channel(4);

    sub.unsubscribe();

    assert!(tx.send(StreamMessage::EndOfStream).await.is_err());
}
