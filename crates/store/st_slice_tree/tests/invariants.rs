//! Model-based checks: the tree must agree byte-for-byte with a naive
//! "last write wins" array, for any insertion sequence.

use rand::rngs::SmallRng;
use rand::{Rng as _, SeedableRng as _};

use st_slice_tree::SliceTree;

const FILE_SIZE: usize = 4096;

/// Replays the same writes into a flat per-byte model: each byte remembers
/// the id of the last write that covered it.
#[derive(Default)]
struct ByteModel {
    owner: Vec<Option<u64>>,
}

impl ByteModel {
    fn write(&mut self, pos: usize, id: u64, len: usize) {
        if self.owner.len() < pos + len {
            self.owner.resize(pos + len, None);
        }
        for byte in &mut self.owner[pos..pos + len] {
            *byte = Some(id);
        }
    }

    fn owner_at(&self, pos: usize) -> Option<u64> {
        self.owner.get(pos).copied().flatten()
    }
}

#[test]
fn random_writes_match_byte_model() {
    let mut rng = SmallRng::seed_from_u64(0x51ce);

    for _round in 0..50 {
        let mut tree = SliceTree::new();
        let mut model = ByteModel::default();

        for id in 1..=64_u64 {
            let pos = rng.random_range(0..FILE_SIZE - 1);
            let len = rng.random_range(1..=FILE_SIZE - pos);
            tree.insert(pos as u64, id, len as u64, 0, len as u64);
            model.write(pos, id, len);
        }

        // Canonical: ascending starts, no overlap.
        let slices: Vec<_> = tree.iter().collect();
        for pair in slices.windows(2) {
            assert!(pair[0].end() <= pair[1].pos, "overlapping slices");
        }

        // Coverage: find(p) agrees with the model at every byte.
        for pos in 0..FILE_SIZE {
            let expected = model.owner_at(pos);
            let actual = tree.find(pos as u64).map(|s| s.id);
            assert_eq!(actual, expected, "mismatch at byte {pos}");
        }

        // The per-slice storage mapping stays within the storage object.
        for s in &slices {
            assert!(s.off_in_storage + s.len <= s.storage_size);
        }
    }
}

#[test]
fn build_emits_ascending_non_overlapping_slices() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut tree = SliceTree::new();

    for id in 1..=256_u64 {
        let pos = rng.random_range(0..1_000_000_u64);
        let len = rng.random_range(1..=65_536_u64);
        tree.insert(pos, id, len, 0, len);
    }

    let built = tree.build("chunks/9");
    for pair in built.windows(2) {
        assert!(pair[0].offset + pair[0].size <= pair[1].offset);
    }
    for slice in &built {
        assert_eq!(slice.storage_key, format!("chunks/9/{}", slice.slice_id));
    }
}
