use spirv::Word;
use std::collections::HashMap;
use std::hash::Hash;

/// Get-or-create table from a structural key to the id that declares it.
#[derive(Debug, Clone)]
pub struct InternCache<K> {
    entries: HashMap<K, Word>,
}

impl<K> Default for InternCache<K> {
    fn default() -> Self {
        InternCache {
            entries: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> InternCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Word> {
        self.entries.get(key).copied()
    }

    /// Record an existing declaration. The first id seen for a key wins.
    pub fn seed(&mut self, key: K, id: Word) {
        self.entries.entry(key).or_insert(id);
    }

    /// Return the cached id for `key`, or run `create` against `ctx` to
    /// declare it and remember the result.
    pub fn get_or_try_insert_with<C: ?Sized, E>(
        &mut self,
        key: &K,
        ctx: &mut C,
        create: impl FnOnce(&mut C, &K) -> Result<Word, E>,
    ) -> Result<Word, E> {
        if let Some(id) = self.get(key) {
            return Ok(id);
        }
        let id = create(ctx, key)?;
        self.entries.insert(key.clone(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_runs_once() {
        let mut cache: InternCache<&str> = InternCache::new();
        let mut next = 10;
        let mut calls = 0;
        for _ in 0..3 {
            let id = cache
                .get_or_try_insert_with(&"uint", &mut next, |next, _| {
                    calls += 1;
                    *next += 1;
                    Ok::<_, ()>(*next)
                })
                .unwrap();
            assert_eq!(id, 11);
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_create_is_not_cached() {
        let mut cache: InternCache<u32> = InternCache::new();
        let result = cache.get_or_try_insert_with(&1, &mut (), |_, _| Err("nope"));
        assert_eq!(result, Err("nope"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_seed_keeps_first() {
        let mut cache = InternCache::new();
        cache.seed("float", 3);
        cache.seed("float", 9);
        assert_eq!(cache.get(&"float"), Some(3));
    }
}
