use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use pagedb::common::{BPlusTreeConfig, StorageConfig};
use pagedb::index::IntegerComparator;
use pagedb::{PageId, RecordId, SlotId, StorageEngine};

const DEMO_INDEX_ID: u32 = 1;

fn run(db_path: &Path) -> pagedb::Result<()> {
    let engine = StorageEngine::open(db_path, StorageConfig::default())?;
    info!("Opened database {}", db_path.display());

    // Small fan-out so a few dozen keys already build a multi-level tree
    let config = BPlusTreeConfig::default()
        .with_leaf_max_size(4)
        .with_internal_max_size(4);
    let mut index = engine.open_index(DEMO_INDEX_ID, Arc::new(IntegerComparator), config)?;

    for i in 0..32i32 {
        let rid = RecordId::new(PageId::new(100 + i as u32), SlotId::new((i % 8) as u16));
        index.insert(&i.to_le_bytes(), rid)?;
    }
    info!(
        "Inserted 32 keys, root is now {:?}",
        index.root_page_id()
    );

    let found = index.get_value(&17i32.to_le_bytes())?;
    info!("Lookup of 17 -> {:?}", found);

    for i in (0..32i32).step_by(3) {
        index.remove(&i.to_le_bytes())?;
    }
    index.verify_integrity()?;

    let remaining: Vec<i32> = index
        .begin()?
        .map(|entry| {
            entry.map(|(key, _)| i32::from_le_bytes([key[0], key[1], key[2], key[3]]))
        })
        .collect::<pagedb::Result<_>>()?;
    info!("{} keys remain: {:?}", remaining.len(), remaining);

    let range = index.range_scan(&10i32.to_le_bytes(), &20i32.to_le_bytes())?;
    info!("Range [10, 20] holds {} keys", range.len());

    engine.flush()?;
    info!("Flushed database to disk");
    Ok(())
}

/// Scratch file for one demo run, never in the working directory.
fn demo_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("pagedb-demo-{}.db", std::process::id()))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = demo_db_path();
    if let Err(e) = run(&db_path) {
        error!("Demo failed: {}", e);
    }

    std::fs::remove_file(&db_path).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_demo_db_lives_in_temp_dir() {
        let path = demo_db_path();
        assert!(path.starts_with(std::env::temp_dir()));
        assert_ne!(path.file_name(), Some("demo.db".as_ref()));
    }

    #[test]
    fn test_demo_runs_on_fresh_file() {
        let temp_file = NamedTempFile::new().unwrap();
        run(temp_file.path()).unwrap();
    }
}
