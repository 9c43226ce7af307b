use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use synced::{BufferManager, KvStore, SyncedMap};

/// Hammers a single synced mapping from many threads at once.
///
/// Each thread inserts a disjoint set of keys through its own clone of the
/// handle, so every insert must survive and the final length is exact. This
/// exercises the load/mutate/save cycle under real contention: every insert
/// reloads the resource, so threads constantly reconcile each other's writes.
#[test]
fn test_concurrent_inserts_through_cloned_handles() {
	const THREADS: usize = 8;
	const INSERTS_PER_THREAD: usize = 50;

	let store = KvStore::new("stress-inserts");
	let doc = SyncedMap::open(store.backend("doc")).unwrap();

	let mut handles = Vec::new();
	for t in 0..THREADS {
		let doc = doc.clone();
		handles.push(thread::spawn(move || {
			for i in 0..INSERTS_PER_THREAD {
				doc.insert(format!("t{}_k{}", t, i), json!(i)).unwrap();
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(doc.len().unwrap(), THREADS * INSERTS_PER_THREAD);
	for t in 0..THREADS {
		for i in 0..INSERTS_PER_THREAD {
			assert_eq!(
				doc.get(&format!("t{}_k{}", t, i)).unwrap(),
				Some(json!(i))
			);
		}
	}
}

/// Runs buffered scopes concurrently on distinct resources sharing one
/// manager. Scopes must not see each other's entries, and every resource must
/// land intact after its own commit.
#[test]
fn test_concurrent_buffered_scopes_on_distinct_resources() {
	const THREADS: usize = 6;
	const WRITES_PER_THREAD: usize = 30;

	let store = KvStore::new("stress-buffered");
	let manager = BufferManager::new(16 * 1024 * 1024);

	let mut handles = Vec::new();
	for t in 0..THREADS {
		let store = store.clone();
		let manager: Arc<BufferManager> = manager.clone();
		handles.push(thread::spawn(move || {
			let doc =
				SyncedMap::with_manager(store.backend(format!("doc_{}", t)), manager).unwrap();
			let scope = doc.buffered();
			for i in 0..WRITES_PER_THREAD {
				doc.insert(format!("k{}", i), json!(t * 1000 + i)).unwrap();
			}
			scope.commit().unwrap();
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	assert_eq!(manager.pending_resources(), 0);
	for t in 0..THREADS {
		let doc = SyncedMap::open(store.backend(format!("doc_{}", t))).unwrap();
		assert_eq!(doc.len().unwrap(), WRITES_PER_THREAD);
		assert_eq!(doc.get("k0").unwrap(), Some(json!(t * 1000)));
	}
}

/// Mixed chaos over one resource: writers, readers, and threads that reset
/// whole subtrees, all racing. Verifies nothing panics, every operation
/// returns a coherent result, and the document stays the shape it claims.
#[test]
fn test_mixed_chaos_operations() {
	const THREADS: usize = 6;
	const OPS_PER_THREAD: usize = 80;

	let store = KvStore::new("stress-chaos");
	let doc = SyncedMap::open(store.backend("doc")).unwrap();
	doc.insert("counters", json!({})).unwrap();
	doc.insert("log", json!([])).unwrap();

	let mut handles = Vec::new();
	for t in 0..THREADS {
		let doc = doc.clone();
		handles.push(thread::spawn(move || {
			let mut rng = rand::thread_rng();
			for i in 0..OPS_PER_THREAD {
				match rng.gen_range(0..5) {
					0 => {
						let counters = doc.map_at("counters").unwrap();
						counters
							.insert(format!("t{}", t), json!(rng.random::<u32>()))
							.unwrap();
					}
					1 => {
						// The log list can be reset by another thread at any
						// moment, so a detached-handle error is acceptable.
						if let Ok(log) = doc.list_at("log") {
							let _ = log.push(json!({"t": t, "i": i}));
						}
					}
					2 => {
						let value = doc.to_value().unwrap();
						assert!(value.is_object());
					}
					3 => {
						let _ = doc.map_at("counters").unwrap().len();
					}
					_ => {
						if rng.gen_range(0..10) == 0 {
							doc.insert("log", json!([])).unwrap();
						} else {
							doc.set_default(format!("extra_t{}", t), json!(true)).unwrap();
						}
					}
				}
			}
		}));
	}
	for handle in handles {
		handle.join().unwrap();
	}

	// The document is still a coherent mapping with its fixed slots present.
	let value = doc.to_value().unwrap();
	assert!(value.is_object());
	assert!(value["counters"].is_object());
	assert!(value["log"].is_array());
	assert_eq!(doc.map_at("counters").unwrap().len().unwrap(), THREADS);
}
