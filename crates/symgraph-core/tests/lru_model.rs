//! Model-based check of the LRU cache against a naive reference.

use proptest::prelude::*;

use symgraph_core::LruCache;

/// Reference implementation: a vector ordered most-recent-first.
#[derive(Default)]
struct ModelLru {
    capacity: usize,
    entries: Vec<(u8, u32)>,
    evictions: u64,
}

impl ModelLru {
    fn new(capacity: usize) -> Self {
        ModelLru {
            capacity,
            entries: Vec::new(),
            evictions: 0,
        }
    }

    fn get(&mut self, key: u8) -> Option<u32> {
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        let entry = self.entries.remove(pos);
        let value = entry.1;
        self.entries.insert(0, entry);
        Some(value)
    }

    fn set(&mut self, key: u8, value: u32) {
        if let Some(pos) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(pos);
            self.entries.insert(0, (key, value));
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop();
            self.evictions += 1;
        }
        self.entries.insert(0, (key, value));
    }

    fn delete(&mut self, key: u8) -> bool {
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Get(u8),
    Set(u8, u32),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u8>().prop_map(Op::Get),
        (any::<u8>(), any::<u32>()).prop_map(|(k, v)| Op::Set(k, v)),
        any::<u8>().prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn cache_matches_the_reference_model(
        capacity in 1usize..12,
        ops in proptest::collection::vec(op_strategy(), 1..200),
    ) {
        let cache: LruCache<u8, u32> = LruCache::new(capacity);
        let mut model = ModelLru::new(capacity);

        for op in ops {
            match op {
                Op::Get(key) => {
                    prop_assert_eq!(cache.get(&key), model.get(key));
                }
                Op::Set(key, value) => {
                    cache.set(key, value);
                    model.set(key, value);
                }
                Op::Delete(key) => {
                    prop_assert_eq!(cache.delete(&key), model.delete(key));
                }
            }
            prop_assert_eq!(cache.len(), model.entries.len());
        }
        prop_assert_eq!(cache.evictions(), model.evictions);
    }
}
