use std::fs;

use proptest::prelude::*;
use streamarch::block::{decode_all, BlockKind};
use streamarch::{create_archive, CreateConfig};
use tempfile::tempdir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Data blocks are full except possibly the last one, never empty, and
    /// concatenate back to the file.
    #[test]
    fn prop_data_blocks_cover_file_exactly(
        content in proptest::collection::vec(any::<u8>(), 0..12_000),
        block_size in 1usize..5_000,
    ) {
        let work = tempdir().unwrap();
        let file = work.path().join("payload.bin");
        fs::write(&file, &content).unwrap();

        let config = CreateConfig { block_size, dir_readers: 1, file_readers: 1, ..Default::default() };
        let mut out = Vec::new();
        create_archive(&[file], &mut out, &config).unwrap();

        let data: Vec<Vec<u8>> = decode_all(&out)
            .unwrap()
            .into_iter()
            .filter(|b| b.kind == BlockKind::Data)
            .map(|b| b.payload)
            .collect();

        prop_assert_eq!(data.len(), content.len().div_ceil(block_size));
        if let Some((last, full)) = data.split_last() {
            prop_assert!(full.iter().all(|c| c.len() == block_size));
            prop_assert!(!last.is_empty() && last.len() <= block_size);
        }
        prop_assert_eq!(data.concat(), content);
    }
}
