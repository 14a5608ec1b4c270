//! Rollback properties over random write sequences.

use crate::common::*;
use proptest::prelude::*;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct Slots {
    words: [u64; 8],
}

impl Persistent for Slots {}

fn writes() -> impl Strategy<Value = Vec<(usize, u64)>> {
    prop::collection::vec((0usize..8, any::<u64>()), 1..32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn abort_restores_every_byte(initial in any::<[u64; 8]>(), ops in writes()) {
        let pool = Pool::ephemeral("prop", 0).unwrap();
        let root = pool.root::<Slots>().unwrap();
        pool.write_persist(root, &Slots { words: initial }).unwrap();

        let result = pool.transaction(|tx| {
            for &(i, v) in &ops {
                tx.write(root.field(|s| &s.words[i]), v)?;
            }
            Err::<(), _>(tx.abort(-1))
        });
        prop_assert!(result.is_err());
        prop_assert_eq!(pool.read(root).unwrap().words, initial);
    }

    #[test]
    fn commit_matches_model(ops in writes()) {
        let pool = Pool::ephemeral("prop", 0).unwrap();
        let root = pool.root::<Slots>().unwrap();
        let mut model = [0u64; 8];
        pool.transaction(|tx| {
            for &(i, v) in &ops {
                tx.write(root.field(|s| &s.words[i]), v)?;
                model[i] = v;
            }
            Ok(())
        })
        .unwrap();
        prop_assert_eq!(pool.read(root).unwrap().words, model);
    }
}
