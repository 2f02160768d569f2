#![cfg(test)]

// Property tests for FlashMap kept inside the crate so they can inspect the
// table's tombstone and registry counters alongside the public API.

use crate::{Cursor, FlashMap, FlashMapError};
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    GetOrInsertWith(usize, i32),
    Erase(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    DropCursors(usize),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::GetOrInsertWith(i, v)),
            2 => idx.clone().prop_map(OpI::Erase),
            3 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => idx.clone().prop_map(OpI::DropCursors),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Shared driver so the collision variant checks exactly the same invariants.
fn run_scenario<S>(
    mut sut: FlashMap<Key, i32, S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    // Cursors obtained through `find`, grouped by the key they sit on.
    let mut live: HashMap<Key, Vec<Cursor<Key, i32, S>>> = HashMap::new();
    let mut erased: Vec<Cursor<Key, i32, S>> = Vec::new();
    let mut detached: Vec<Cursor<Key, i32, S>> = Vec::new();

    let ctor_calls = Rc::new(Cell::new(0));
    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let inserted = sut.insert(k.clone(), v).expect("allocation");
                prop_assert_eq!(inserted, !already, "insert reports whether the key was new");
                model.entry(k).or_insert(v);
            }
            OpI::GetOrInsertWith(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = ctor_calls.clone();
                let before = counter.get();
                let got = *sut.get_or_insert_with(k.clone(), move || {
                    counter.set(counter.get() + 1);
                    v
                });
                let expect = *model.entry(k).or_insert(v);
                prop_assert_eq!(got, expect);
                let ran = ctor_calls.get() - before;
                prop_assert_eq!(ran, usize::from(!already), "constructor runs only on a miss");
            }
            OpI::Erase(i) => {
                let k = key_from(pool, i);
                let removed = sut.erase(&k);
                prop_assert_eq!(removed, model.remove(&k).is_some());
                if let Some(cs) = live.remove(&k) {
                    erased.extend(cs);
                }
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                let c = sut.find(&k).expect("allocation");
                match model.get(&k) {
                    Some(v) => {
                        prop_assert_eq!(c.value(&sut), Ok(v));
                        live.entry(k).or_default().push(c);
                    }
                    None => {
                        prop_assert!(c.is_end(&sut).unwrap());
                        prop_assert!(c == *sut.end());
                    }
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                if let Some(c) = live.get(&k).and_then(|cs| cs.last()) {
                    let vr = c.value_mut(&mut sut).expect("live cursor resolves");
                    *vr = vr.saturating_add(d);
                    let mv = model.get_mut(&k).expect("cursor key present in model");
                    *mv = mv.saturating_add(d);
                } else if let Some(vr) = sut.get_mut(k.0.as_str()) {
                    *vr = vr.saturating_add(d);
                    let mv = model.get_mut(&k).expect("present in model");
                    *mv = mv.saturating_add(d);
                } else {
                    prop_assert!(!model.contains_key(&k));
                }
            }
            OpI::DropCursors(i) => {
                let k = key_from(pool, i);
                live.remove(&k);
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                detached.extend(live.drain().flat_map(|(_, cs)| cs));
                detached.append(&mut erased);
                prop_assert_eq!(sut.tombstones(), 0);
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.keys().cloned().collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                prop_assert_eq!(sut.iter().len(), model.len());
            }
        }

        // Post-conditions after each op.
        // 1) Cursors follow their entry through any growth.
        for (k, cs) in &live {
            for c in cs {
                prop_assert_eq!(c.key(&sut), Ok(k));
                prop_assert_eq!(c.value(&sut), Ok(&model[k]));
            }
        }
        // 2) Erased entries are never observed, even after slot reuse.
        for c in &erased {
            prop_assert_eq!(c.value(&sut), Err(FlashMapError::UseAfterErase));
        }
        for c in &detached {
            prop_assert_eq!(c.value(&sut), Err(FlashMapError::Invalidated));
        }
        // 3) Size and load parity.
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        prop_assert!(sut.len() <= sut.max_load());
        prop_assert!(sut.capacity().is_power_of_two());
        let registered: usize = live.values().map(Vec::len).sum::<usize>() + erased.len();
        prop_assert_eq!(sut.live_cursors(), registered);
    }
    Ok(())
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - `insert` only adds absent keys; `get_or_insert_with` runs its constructor
//   once per miss.
// - `erase`/`contains` parity with the model.
// - Cursors from `find` keep resolving to their key across growth; cursors on
//   erased entries report UseAfterErase; `clear` detaches all of them.
// - `len` never exceeds the load limit and capacity stays a power of two.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        // Tiny starting capacity so most scenarios rehash several times.
        run_scenario(FlashMap::with_capacity(2), &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Property: Same state-machine invariants as above, under worst-case
// collision behavior (constant hasher). Every key shares one probe chain, so
// tombstone reuse and rehash placement both run through long collision runs.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(FlashMap::with_capacity_and_hasher(2, ConstBuildHasher), &pool, ops)?;
    }
}
