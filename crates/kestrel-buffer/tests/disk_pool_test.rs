//! Buffer pool integration tests against disk-backed page files.
//!
//! Covers:
//! - Dirty pages surviving eviction and pool teardown
//! - flush_file persisting a file before it is reopened
//! - Page disposal and reuse through the pool
//! - Several files sharing one pool
//! - Concurrent fetch and release from multiple threads

use std::sync::Arc;
use tempfile::tempdir;

use kestrel_buffer::{BufferPool, BufferPoolConfig};
use kestrel_common::page::{PageId, PageNum};
use kestrel_common::KestrelError;
use kestrel_storage::{DiskManager, DiskManagerConfig, PageFile};

fn create_disk_manager(dir: &std::path::Path) -> DiskManager {
    DiskManager::new(DiskManagerConfig {
        data_dir: dir.to_path_buf(),
        fsync_enabled: false,
    })
    .unwrap()
}

fn create_pool(num_frames: usize) -> BufferPool {
    BufferPool::new(BufferPoolConfig::new(num_frames)).unwrap()
}

/// Allocates `n` pages and writes `tag(page_num)` into each payload.
fn fill_pages(pool: &BufferPool, file: &Arc<dyn PageFile>, n: u32, tag: impl Fn(PageNum) -> u8) {
    for _ in 0..n {
        let (page_num, page) = pool.allocate_page(file).unwrap();
        page.write().payload_mut()[..4].fill(tag(page_num));
        page.release(true).unwrap();
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_dirty_pages_survive_eviction() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let file: Arc<dyn PageFile> = dm.open_file(1).unwrap();
    let pool = create_pool(2);

    fill_pages(&pool, &file, 6, |n| 0x40 + n as u8);

    let stats = pool.stats();
    assert_eq!(stats.used_frames, 2);
    assert!(stats.evictions >= 4);

    for page_num in 0..6 {
        let page = pool.fetch_page(&file, page_num).unwrap();
        let data = page.read();
        assert_eq!(data.stamped_id(), PageId::new(1, page_num));
        assert_eq!(&data.payload()[..4], &[0x40 + page_num as u8; 4]);
    }
}

#[test]
fn test_pool_drop_writes_back() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let file: Arc<dyn PageFile> = dm.open_file(3).unwrap();

    {
        let pool = create_pool(8);
        fill_pages(&pool, &file, 4, |n| n as u8 + 1);
        assert_eq!(pool.stats().dirty_frames, 4);
    }

    let pool = create_pool(8);
    for page_num in 0..4 {
        let page = pool.fetch_page(&file, page_num).unwrap();
        assert_eq!(page.read().payload()[0], page_num as u8 + 1);
    }
}

#[test]
fn test_flush_file_then_reopen() {
    let dir = tempdir().unwrap();

    {
        let dm = create_disk_manager(dir.path());
        let disk_file = dm.open_file(7).unwrap();
        let file: Arc<dyn PageFile> = disk_file.clone();
        let pool = create_pool(4);

        fill_pages(&pool, &file, 3, |n| 0xA0 + n as u8);
        pool.flush_file(disk_file.as_ref()).unwrap();

        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.stats().dirty_frames, 0);
        assert_eq!(disk_file.num_pages(), 3);
    }

    let dm = create_disk_manager(dir.path());
    let file: Arc<dyn PageFile> = dm.open_file(7).unwrap();
    let pool = create_pool(4);
    for page_num in 0..3 {
        let page = pool.fetch_page(&file, page_num).unwrap();
        assert_eq!(page.read().payload()[0], 0xA0 + page_num as u8);
    }
}

#[test]
fn test_flush_file_rejects_pinned_page() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let disk_file = dm.open_file(1).unwrap();
    let file: Arc<dyn PageFile> = disk_file.clone();
    let pool = create_pool(4);

    fill_pages(&pool, &file, 2, |_| 0x11);
    let pinned = pool.fetch_page(&file, 1).unwrap();

    let err = pool.flush_file(disk_file.as_ref()).unwrap_err();
    assert!(matches!(err, KestrelError::PagePinned { page_id } if page_id == PageId::new(1, 1)));
    assert!(!pool.contains(PageId::new(1, 0)));

    pinned.release(false).unwrap();
    pool.flush_file(disk_file.as_ref()).unwrap();
    assert_eq!(pool.page_count(), 0);
}

// =============================================================================
// Allocation and disposal
// =============================================================================

#[test]
fn test_dispose_and_reuse() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let disk_file = dm.open_file(2).unwrap();
    let file: Arc<dyn PageFile> = disk_file.clone();
    let pool = create_pool(4);

    fill_pages(&pool, &file, 3, |_| 0xFF);

    pool.dispose_page(disk_file.as_ref(), 1).unwrap();
    assert!(!pool.contains(PageId::new(2, 1)));
    assert_eq!(disk_file.free_page_count(), 1);

    assert!(matches!(
        pool.fetch_page(&file, 1),
        Err(KestrelError::PageNotAllocated { .. })
    ));

    let (page_num, page) = pool.allocate_page(&file).unwrap();
    assert_eq!(page_num, 1);
    assert_eq!(page.read().stamped_id(), PageId::new(2, 1));
    assert!(page.read().payload().iter().all(|&b| b == 0));
    assert_eq!(disk_file.free_page_count(), 0);
    assert_eq!(disk_file.num_pages(), 3);
}

#[test]
fn test_dispose_pinned_page_is_rejected() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let disk_file = dm.open_file(2).unwrap();
    let file: Arc<dyn PageFile> = disk_file.clone();
    let pool = create_pool(4);

    let (page_num, page) = pool.allocate_page(&file).unwrap();
    assert!(matches!(
        pool.dispose_page(disk_file.as_ref(), page_num),
        Err(KestrelError::PagePinned { .. })
    ));
    assert_eq!(disk_file.free_page_count(), 0);
    drop(page);
}

// =============================================================================
// Sharing
// =============================================================================

#[test]
fn test_files_share_pool() {
    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let file_a: Arc<dyn PageFile> = dm.open_file(1).unwrap();
    let file_b: Arc<dyn PageFile> = dm.open_file(2).unwrap();
    let pool = create_pool(3);

    fill_pages(&pool, &file_a, 3, |_| 0xAA);
    fill_pages(&pool, &file_b, 3, |_| 0xBB);

    // Same page number, different files.
    let a = pool.fetch_page(&file_a, 0).unwrap();
    let b = pool.fetch_page(&file_b, 0).unwrap();
    assert_ne!(a.frame_id(), b.frame_id());
    assert_eq!(a.read().payload()[0], 0xAA);
    assert_eq!(b.read().payload()[0], 0xBB);
}

#[test]
fn test_concurrent_fetch_release() {
    const THREADS: u32 = 4;
    const PAGES_PER_THREAD: u32 = 4;
    const ROUNDS: u32 = 48;

    let dir = tempdir().unwrap();
    let dm = create_disk_manager(dir.path());
    let file: Arc<dyn PageFile> = dm.open_file(1).unwrap();
    let pool = create_pool(6);

    fill_pages(&pool, &file, THREADS * PAGES_PER_THREAD, |_| 0);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let pool = &pool;
            let file = &file;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let page_num = t * PAGES_PER_THREAD + round % PAGES_PER_THREAD;
                    let page = loop {
                        match pool.fetch_page(file, page_num) {
                            Ok(page) => break page,
                            Err(e) if e.is_retryable() => std::thread::yield_now(),
                            Err(e) => panic!("fetch failed: {e}"),
                        }
                    };
                    page.write().payload_mut()[0] += 1;
                    page.release(true).unwrap();
                }
            });
        }
    });

    assert_eq!(pool.stats().pinned_frames, 0);
    for page_num in 0..THREADS * PAGES_PER_THREAD {
        let page = pool.fetch_page(&file, page_num).unwrap();
        assert_eq!(page.read().payload()[0] as u32, ROUNDS / PAGES_PER_THREAD);
    }
}
