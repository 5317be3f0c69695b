//! Behaviour every backend layout must share.

use std::io::Cursor;
use std::time::Instant;

use serde_json::json;
use tempfile::TempDir;

use dwn_data::ChunkingStrategy;
use dwn_store::EngineConfig;
use dwn_types::{
    FilterValue, GenericMessage, IndexValue, KeyValues, MessageSort, OpContext, Pagination,
    RangeFilter, SortDirection, SortProperty, StoreError,
};

use crate::config::{Backend, StorageConfig};
use crate::storage::Storage;

fn ctx() -> OpContext {
    OpContext::background()
}

// Small chunks so multi-block payloads take the DAG path.
const CHUNKING: ChunkingStrategy = ChunkingStrategy::Chunked {
    chunk_size: 8,
    max_links: 3,
};

/// Every layout, each with its own temporary directory.
fn layouts() -> Vec<(&'static str, Storage, TempDir)> {
    let mut out = Vec::new();
    let mut add = |name: &'static str, configure: &dyn Fn(&mut StorageConfig, &TempDir)| {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig {
            chunking: CHUNKING,
            ..StorageConfig::default()
        };
        configure(&mut config, &dir);
        out.push((name, Storage::open(&config).unwrap(), dir));
    };

    add("kv-memory", &|_, _| {});
    add("kv-memory-shared", &|c, _| c.kv.shared = true);
    add("kv-redb", &|c, dir| {
        c.kv.engine = EngineConfig::Redb;
        c.kv.blockstore_path = Some(dir.path().join("blocks.redb"));
        c.kv.index_path = Some(dir.path().join("index.redb"));
        c.kv.data_path = Some(dir.path().join("data.redb"));
    });
    add("kv-redb-shared", &|c, dir| {
        c.kv.engine = EngineConfig::Redb;
        c.kv.shared_path = Some(dir.path().join("store.redb"));
    });
    add("sql-memory", &|c, _| c.backend = Backend::Sql);
    add("sql-file", &|c, dir| {
        c.backend = Backend::Sql;
        c.sql.path = dir.path().join("dwn.sqlite");
    });
    out
}

fn message(n: i64) -> GenericMessage {
    json!({
        "descriptor": {
            "interface": "Records",
            "method": "Write",
            "messageTimestamp": timestamp(n),
        },
        "n": n,
    })
}

fn timestamp(n: i64) -> String {
    format!("2024-01-01T00:{:02}:{:02}.000000Z", n / 60, n % 60)
}

fn indexes(n: i64) -> KeyValues {
    KeyValues::from([
        ("interface".to_string(), IndexValue::from("Records")),
        ("method".to_string(), IndexValue::from("Write")),
        ("messageTimestamp".to_string(), IndexValue::from(timestamp(n))),
        ("dateCreated".to_string(), IndexValue::from(n - 10)),
        (
            "schema".to_string(),
            IndexValue::from(if n % 2 == 0 { "even" } else { "odd" }),
        ),
    ])
}

fn numbers(messages: &[GenericMessage]) -> Vec<i64> {
    messages.iter().map(|m| m["n"].as_i64().unwrap()).collect()
}

fn filter(property: &str, value: impl Into<FilterValue>) -> dwn_types::Filter {
    dwn_types::Filter::from([(property.to_string(), value.into())])
}

// ---- Message store ----

#[test]
fn messages_round_trip_and_isolate_tenants() {
    for (name, storage, _dir) in layouts() {
        let store = storage.messages();
        let mut msg = message(1);
        msg["encodedData"] = json!("aGVsbG8");
        let cid = store.put(&ctx(), "alice", &msg, &indexes(1)).unwrap().to_string();

        assert_eq!(store.get(&ctx(), "alice", &cid).unwrap(), Some(msg.clone()), "{name}");
        assert_eq!(store.get(&ctx(), "bob", &cid).unwrap(), None, "{name}");
        assert!(
            store.query(&ctx(), "bob", &[], None, None).unwrap().messages.is_empty(),
            "{name}"
        );

        store.delete(&ctx(), "bob", &cid).unwrap();
        assert!(store.get(&ctx(), "alice", &cid).unwrap().is_some(), "{name}");
        store.delete(&ctx(), "alice", &cid).unwrap();
        assert_eq!(store.get(&ctx(), "alice", &cid).unwrap(), None, "{name}");
    }
}

#[test]
fn message_cids_agree_across_backends() {
    let cids: Vec<String> = layouts()
        .into_iter()
        .map(|(_, storage, _dir)| {
            storage
                .messages()
                .put(&ctx(), "t", &message(7), &indexes(7))
                .unwrap()
                .to_string()
        })
        .collect();
    assert!(cids.windows(2).all(|w| w[0] == w[1]), "{cids:?}");
}

#[test]
fn messages_require_indexes_and_valid_cids() {
    for (name, storage, _dir) in layouts() {
        let store = storage.messages();
        let err = store.put(&ctx(), "t", &message(1), &KeyValues::new()).unwrap_err();
        assert!(matches!(err, StoreError::EmptyIndexSet), "{name}: {err}");
        let err = store.get(&ctx(), "t", "not-a-cid").unwrap_err();
        assert!(matches!(err, StoreError::InvalidContentId(_)), "{name}: {err}");
    }
}

#[test]
fn query_sorts_filters_and_paginates() {
    for (name, storage, _dir) in layouts() {
        let store = storage.messages();
        for n in (1..=25).rev() {
            store.put(&ctx(), "t", &message(n), &indexes(n)).unwrap();
        }

        let all = store.query(&ctx(), "t", &[], None, None).unwrap();
        assert_eq!(numbers(&all.messages), (1..=25).collect::<Vec<_>>(), "{name}");
        assert_eq!(all.cursor, None, "{name}");

        let sort = MessageSort::new(SortProperty::DateCreated, SortDirection::Descending);
        let mut seen = Vec::new();
        let mut pagination = Pagination::limit(10);
        let mut pages = Vec::new();
        loop {
            let page = store.query(&ctx(), "t", &[], Some(&sort), Some(&pagination)).unwrap();
            pages.push(page.messages.len());
            seen.extend(numbers(&page.messages));
            match page.cursor {
                Some(cursor) => pagination = Pagination::limit(10).with_cursor(cursor),
                None => break,
            }
        }
        assert_eq!(pages, vec![10, 10, 5], "{name}");
        assert_eq!(seen, (1..=25).rev().collect::<Vec<_>>(), "{name}");

        // Negative numbers order before positive ones.
        let negative = [filter("dateCreated", RangeFilter::lt(0))];
        let page = store.query(&ctx(), "t", &negative, Some(&sort), None).unwrap();
        assert_eq!(numbers(&page.messages), (1..=9).rev().collect::<Vec<_>>(), "{name}");

        let mut odd_and_low = filter("schema", IndexValue::from("odd"));
        odd_and_low.insert("dateCreated".into(), RangeFilter::lte(-5).into());
        let either = [odd_and_low, filter("dateCreated", IndexValue::from(14))];
        let page = store.query(&ctx(), "t", &either, None, None).unwrap();
        assert_eq!(numbers(&page.messages), vec![1, 3, 5, 24], "{name}");
    }
}

#[test]
fn exact_multiple_of_page_size_ends_without_cursor() {
    for (name, storage, _dir) in layouts() {
        let store = storage.messages();
        for n in 1..=10 {
            store.put(&ctx(), "t", &message(n), &indexes(n)).unwrap();
        }
        let first = store
            .query(&ctx(), "t", &[], None, Some(&Pagination::limit(5)))
            .unwrap();
        let cursor = first.cursor.expect("second page");
        let second = store
            .query(&ctx(), "t", &[], None, Some(&Pagination::limit(5).with_cursor(cursor)))
            .unwrap();
        assert_eq!(numbers(&second.messages), vec![6, 7, 8, 9, 10], "{name}");
        assert_eq!(second.cursor, None, "{name}");
    }
}

#[test]
fn garbage_cursor_is_rejected() {
    for (name, storage, _dir) in layouts() {
        let store = storage.messages();
        store.put(&ctx(), "t", &message(1), &indexes(1)).unwrap();
        let pagination = Pagination::limit(5).with_cursor("not a cursor");
        let err = store.query(&ctx(), "t", &[], None, Some(&pagination)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidCursor(_)), "{name}: {err}");
    }
}

// ---- Data store ----

#[test]
fn data_is_deduplicated_and_collected() {
    let payload = b"a payload long enough to span several chunks".to_vec();
    let data_cid = CHUNKING.content_id(&payload).unwrap().to_string();

    for (name, storage, _dir) in layouts() {
        let data = storage.data();
        let put = data
            .put(&ctx(), "t", "m1", &data_cid, &mut Cursor::new(payload.clone()))
            .unwrap();
        assert_eq!(put.data_cid.to_string(), data_cid, "{name}");
        assert_eq!(put.data_size, payload.len() as u64, "{name}");

        let assoc = data.associate(&ctx(), "t", "m2", &data_cid).unwrap();
        assert_eq!(assoc.data_size, payload.len() as u64, "{name}");

        let got = data.get(&ctx(), "t", "m2", &data_cid).unwrap();
        assert_eq!(got.data_size, payload.len() as u64, "{name}");
        assert_eq!(got.into_bytes().unwrap(), payload, "{name}");

        let err = data.get(&ctx(), "t", "m3", &data_cid).unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }), "{name}: {err}");
        let err = data.get(&ctx(), "other", "m1", &data_cid).unwrap_err();
        assert!(err.is_not_found(), "{name}: {err}");

        data.delete(&ctx(), "t", "m1", &data_cid).unwrap();
        assert!(data.get(&ctx(), "t", "m2", &data_cid).is_ok(), "{name}");
        data.delete(&ctx(), "t", "m2", &data_cid).unwrap();
        let err = data.get(&ctx(), "t", "m2", &data_cid).unwrap_err();
        assert!(err.is_not_found(), "{name}: {err}");
    }
}

#[test]
fn data_with_wrong_cid_is_refused() {
    let claimed = CHUNKING.content_id(b"claimed").unwrap().to_string();
    for (name, storage, _dir) in layouts() {
        let data = storage.data();
        let err = data
            .put(&ctx(), "t", "m", &claimed, &mut Cursor::new(b"actual".to_vec()))
            .unwrap_err();
        assert!(matches!(err, StoreError::CidMismatch { .. }), "{name}: {err}");
        assert!(data.get(&ctx(), "t", "m", &claimed).unwrap_err().is_not_found(), "{name}");
    }
}

// ---- Event log ----

#[test]
fn events_follow_append_order() {
    for (name, storage, _dir) in layouts() {
        let events = storage.events();
        for cid in ["c", "a", "b"] {
            events.append(&ctx(), "t", cid, &indexes(1)).unwrap();
        }
        events.append(&ctx(), "other", "x", &indexes(1)).unwrap();

        assert_eq!(events.get_events(&ctx(), "t", None).unwrap(), vec!["c", "a", "b"], "{name}");
        assert_eq!(events.get_events(&ctx(), "t", Some("c")).unwrap(), vec!["a", "b"], "{name}");
        let err = events.get_events(&ctx(), "t", Some("missing")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidCursor(_)), "{name}: {err}");

        events.append(&ctx(), "t", "c", &indexes(2)).unwrap();
        assert_eq!(events.get_events(&ctx(), "t", None).unwrap(), vec!["a", "b", "c"], "{name}");

        let even = [filter("schema", IndexValue::from("even"))];
        assert_eq!(events.query_events(&ctx(), "t", &even, None).unwrap(), vec!["c"], "{name}");

        events.delete_events_by_cid(&ctx(), "t", &["a".to_string()]).unwrap();
        assert_eq!(events.get_events(&ctx(), "t", None).unwrap(), vec!["b", "c"], "{name}");
        assert_eq!(events.get_events(&ctx(), "other", None).unwrap(), vec!["x"], "{name}");
    }
}

// ---- Lifecycle ----

#[test]
fn closed_storage_rejects_and_reopen_keeps_data() {
    for (name, storage, _dir) in layouts() {
        let cid = storage
            .messages()
            .put(&ctx(), "t", &message(1), &indexes(1))
            .unwrap()
            .to_string();
        storage.events().append(&ctx(), "t", &cid, &indexes(1)).unwrap();

        storage.close().unwrap();
        storage.close().unwrap();
        let err = storage.messages().get(&ctx(), "t", &cid).unwrap_err();
        assert!(matches!(err, StoreError::StoreNotOpen), "{name}: {err}");
        let err = storage.events().get_events(&ctx(), "t", None).unwrap_err();
        assert!(matches!(err, StoreError::StoreNotOpen), "{name}: {err}");

        storage.reopen().unwrap();
        assert!(storage.messages().get(&ctx(), "t", &cid).unwrap().is_some(), "{name}");
        assert_eq!(storage.events().get_events(&ctx(), "t", None).unwrap(), vec![cid.clone()], "{name}");
        assert!(storage.reconcile(&ctx(), "t").unwrap().is_clean(), "{name}");

        storage.clear(&ctx()).unwrap();
        assert!(storage.messages().get(&ctx(), "t", &cid).unwrap().is_none(), "{name}");
        assert!(storage.events().get_events(&ctx(), "t", None).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn expired_deadline_fails_before_any_work() {
    for (name, storage, _dir) in layouts() {
        let expired = OpContext::background().with_deadline(Instant::now());
        let err = storage
            .messages()
            .put(&expired, "t", &message(1), &indexes(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded), "{name}: {err}");
        assert!(
            storage.messages().query(&ctx(), "t", &[], None, None).unwrap().messages.is_empty(),
            "{name}"
        );
    }
}

// ---- Concurrency ----

#[test]
fn stores_sharing_a_handle_accept_concurrent_writers() {
    for (name, storage, _dir) in layouts() {
        std::thread::scope(|s| {
            for w in 0..2i64 {
                let messages = storage.messages().clone();
                s.spawn(move || {
                    for n in (0..15).map(|i| w * 15 + i) {
                        messages.put(&ctx(), "t", &message(n), &indexes(n)).unwrap();
                    }
                });
            }
            let data = storage.data().clone();
            s.spawn(move || {
                for n in 0..5u8 {
                    let payload = vec![n; 40];
                    let data_cid = CHUNKING.content_id(&payload).unwrap().to_string();
                    data.put(&ctx(), "t", &format!("m{n}"), &data_cid, &mut Cursor::new(payload))
                        .unwrap();
                }
            });
            let events = storage.events().clone();
            s.spawn(move || {
                for n in 0..20 {
                    events.append(&ctx(), "t", &format!("e{n:02}"), &indexes(n)).unwrap();
                }
            });
            let storage = &storage;
            s.spawn(move || {
                for _ in 0..5 {
                    assert!(storage.reconcile(&ctx(), "t").unwrap().is_clean());
                }
            });
        });

        let all = storage.messages().query(&ctx(), "t", &[], None, None).unwrap();
        assert_eq!(numbers(&all.messages), (0..30).collect::<Vec<_>>(), "{name}");
        let expected: Vec<String> = (0..20).map(|n| format!("e{n:02}")).collect();
        assert_eq!(storage.events().get_events(&ctx(), "t", None).unwrap(), expected, "{name}");
        for n in 0..5u8 {
            let data_cid = CHUNKING.content_id(&[n; 40]).unwrap().to_string();
            let got = storage.data().get(&ctx(), "t", &format!("m{n}"), &data_cid).unwrap();
            assert_eq!(got.into_bytes().unwrap(), vec![n; 40], "{name}");
        }
        assert!(storage.reconcile(&ctx(), "t").unwrap().is_clean(), "{name}");
    }
}
