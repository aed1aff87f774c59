// ==============================================
// DB INSTANCE TESTS (integration)
// ==============================================

use crate::common::builders::{small_store_config, CollectionBuilder};
use crate::common::logger::init_test_logger;
use crate::{assert_err, assert_ok};
use arbor::common::config::StoreConfig;
use arbor::common::db_instance::{DBInstance, COLLECTION_CACHE_NAME};
use arbor::common::exception::{CacheError, CodecError, ConfigError, DBError};
use arbor::concurrency::lock_manager::LockMode;
use arbor::storage::cache::{Cacheable, NamedCacheable};
use arbor::storage::codec::VariableByteOutput;
use arbor::storage::collection_store::CollectionStore;
use arbor::storage::record::{CollectionRecord, EntryRecord, RESOURCE_BINARY};
use std::io::Write;
use std::sync::{Arc, Barrier};
use std::thread;

mod persistence {
    use super::*;

    #[test]
    fn test_mutations_survive_eviction_and_reload() {
        init_test_logger();
        let db = assert_ok!(DBInstance::new(small_store_config(2)));
        let root = assert_ok!(db.create_collection(1, "/db"));
        root.add_child("apps");
        root.add_entry(EntryRecord::new(10, "logo.png", RESOURCE_BINARY, 42));
        db.release_collection(&root);

        for id in 2..6 {
            let filler = assert_ok!(db.create_collection(id, format!("/db/f{}", id)));
            db.release_collection(&filler);
        }
        assert!(!db.collections().contains(1));

        let reloaded = assert_ok!(db.open_collection_by_name("/db")).unwrap();
        assert_eq!(reloaded.children(), vec!["apps".to_string()]);
        assert_eq!(reloaded.entry("logo.png").unwrap().last_modified, 42);
        assert_eq!(reloaded.ref_count(), 1);
        db.release_collection(&reloaded);
    }

    #[test]
    fn test_failed_flush_keeps_dirty_collection_cached() {
        init_test_logger();
        let store = Arc::new(CollectionStore::new());
        let db = assert_ok!(DBInstance::with_store(small_store_config(1), Arc::clone(&store)));
        let first = assert_ok!(db.create_collection(1, "/db/a"));
        db.release_collection(&first);

        store.set_read_only(true);
        let err = assert_err!(db.create_collection(2, "/db/b"));
        assert!(matches!(
            err,
            DBError::Cache(CacheError::CapacityExhausted { .. })
        ));
        assert!(db.collections().contains(1));
        assert!(first.is_dirty());

        store.set_read_only(false);
        let second = assert_ok!(db.create_collection(2, "/db/b"));
        db.release_collection(&second);
        assert!(!db.collections().contains(1));
        assert!(store.contains(1));
    }

    #[test]
    fn test_store_outlives_instance() {
        init_test_logger();
        let store = Arc::new(CollectionStore::new());
        {
            let db = assert_ok!(DBInstance::with_store(
                StoreConfig::default(),
                Arc::clone(&store)
            ));
            let docs = assert_ok!(db.create_collection(5, "/db/docs"));
            docs.set_permissions(0o700);
            db.release_collection(&docs);
            let report = db.shutdown();
            assert_eq!(report.flushed, 1);
        }

        let db = assert_ok!(DBInstance::with_store(StoreConfig::default(), store));
        let docs = assert_ok!(db.open_collection_by_name("/db/docs")).unwrap();
        assert_eq!(docs.identity(), 5);
        assert_eq!(docs.permissions(), 0o700);
    }

    #[test]
    fn test_legacy_record_needs_upgrade() {
        init_test_logger();
        let store = Arc::new(CollectionStore::new());
        let record: CollectionRecord = CollectionBuilder::new(3)
            .named("/db/legacy")
            .entry(30, "a.xml")
            .entry(31, "b.xml")
            .record();
        let mut out = VariableByteOutput::new();
        record.encode_legacy(&mut out);
        let legacy = out.into_bytes();

        store.put_raw(3, "/db/legacy", legacy.clone());
        let db = assert_ok!(DBInstance::with_store(StoreConfig::default(), Arc::clone(&store)));
        let err = assert_err!(db.open_collection(3));
        assert!(matches!(err, DBError::Codec(_)));

        store.put_raw(3, "/db/legacy", assert_ok!(CollectionRecord::upgrade_legacy(legacy)));
        let upgraded = assert_ok!(db.open_collection(3)).unwrap();
        assert_eq!(upgraded.record(), record);
    }
}

mod concurrency {
    use super::*;

    #[test]
    fn test_concurrent_misses_load_one_copy() {
        init_test_logger();
        let store = Arc::new(CollectionStore::new());
        let seed = CollectionBuilder::new(9).named("/db/shared").build();
        assert_ok!(store.write(&seed));

        let db = Arc::new(assert_ok!(DBInstance::with_store(
            StoreConfig::default(),
            store
        )));
        let barrier = Arc::new(Barrier::new(6));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    assert_ok!(db.open_collection(9)).unwrap()
                })
            })
            .collect();
        let opened: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(opened.iter().all(|c| Arc::ptr_eq(c, &opened[0])));
        assert_eq!(opened[0].ref_count(), 6);
        assert_eq!(opened[0].name(), "/db/shared");
    }

    #[test]
    fn test_shutdown_skips_locked_collections() {
        init_test_logger();
        let db = assert_ok!(DBInstance::new(StoreConfig::default()));
        let busy = assert_ok!(db.create_collection(1, "/db/busy"));
        let idle = assert_ok!(db.create_collection(2, "/db/idle"));
        let mut txn = assert_ok!(db.begin_transaction());
        assert_ok!(db.lock_collection(&mut txn, &busy, LockMode::Write));

        let report = db.shutdown();
        assert_eq!(report.active_transactions, 1);
        assert_eq!(report.flushed, 1);
        assert_eq!(report.skipped, 1);
        assert!(busy.is_dirty());
        assert!(!idle.is_dirty());
        assert!(db.get_store().contains(2));

        assert_ok!(txn.commit());
        assert_eq!(db.get_transaction_manager().active_count(), 1);
        drop(txn);
        assert_eq!(db.get_transaction_manager().active_count(), 0);
    }
}

mod configuration {
    use super::*;

    #[test]
    fn test_instance_from_toml_file() {
        init_test_logger();
        let mut file = assert_ok!(tempfile::NamedTempFile::new());
        assert_ok!(writeln!(
            file,
            "log_level = \"warn\"\n\n[collection_cache]\ncapacity = 3\nmax_capacity = 6\n\n[budget]\nmax_total_capacity = 10\n\n[lock]\nacquire_timeout_ms = 50"
        ));

        let config = assert_ok!(StoreConfig::load(file.path()));
        let db = assert_ok!(DBInstance::new(config));
        assert_eq!(db.collections().capacity(), 3);
        assert_eq!(
            db.get_cache_manager().capacity_of(COLLECTION_CACHE_NAME),
            Some(3)
        );
        assert_eq!(db.get_cache_manager().max_total_capacity(), 10);
        assert_eq!(db.lock_timeout(), Some(std::time::Duration::from_millis(50)));

        let root = assert_ok!(db.create_collection(1, "/db"));
        assert_eq!(root.lock().timeout(), db.lock_timeout());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = StoreConfig::default();
        config.collection_cache.capacity = config.budget.max_total_capacity + 1;
        config.collection_cache.max_capacity = config.collection_cache.capacity;
        let err = assert_err!(DBInstance::new(config));
        assert!(matches!(err, DBError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_corrupt_store_record_surfaces_codec_error() {
        let store = Arc::new(CollectionStore::new());
        store.put_raw(4, "/db/broken", bytes::Bytes::from_static(&[0x04, 0x09, b'/']));
        let db = assert_ok!(DBInstance::with_store(StoreConfig::default(), store));
        let err = assert_err!(db.open_collection_by_name("/db/broken"));
        assert!(matches!(err, DBError::Codec(CodecError::Truncated { .. })));
    }
}
