use super::*;

fn prefix(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

#[test]
fn test_alloc_set_get_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 8, 0).unwrap();
    let h = store.alloc().unwrap();
    store.set(h, b"hello world").unwrap();
    assert_eq!(store.size(h), 11);
    assert_eq!(store.get_vec(h).unwrap(), b"hello world");
}

#[test]
fn test_streaming_writer_reader_crosses_node_boundary_s1() {
    // S1 from spec.md: node_size=16, two writes totalling 26 bytes must
    // chain across 3 nodes and read back exactly.
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    assert_eq!(store.node_size(), 16);
    let h = store.alloc().unwrap();

    let free_before = store.num_free_nodes();
    {
        let mut w = store.writer_open(h).unwrap();
        w.write(b"ABCDEFGHIJ").unwrap();
        w.write(b"KLMNOPQRSTUVWXYZ").unwrap();
    }
    assert_eq!(store.size(h), 26);
    let free_after = store.num_free_nodes();
    assert_eq!(free_before - free_after, 3, "chain must consume exactly 3 nodes");

    let mut buf = [0u8; 32];
    let mut r = store.reader_open(h);
    let n = r.read(&mut buf).unwrap();
    assert_eq!(n, 26);
    assert_eq!(&buf[..26], b"ABCDEFGHIJKLMNOPQRSTUVWXYZ");
}

#[test]
fn test_reader_partial_reads_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    {
        let mut w = store.writer_open(h).unwrap();
        w.write(b"0123456789abcdefghij").unwrap(); // 20 bytes, 2 nodes
    }
    let mut r = store.reader_open(h);
    let mut out = Vec::new();
    loop {
        let mut chunk = [0u8; 7];
        let n = r.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(out, b"0123456789abcdefghij");
}

#[test]
fn test_set_shrink_frees_trailing_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    store.set(h, &[b'x'; 40]).unwrap();
    let free_after_big = store.num_free_nodes();
    store.set(h, &[b'y'; 4]).unwrap();
    assert_eq!(store.get_vec(h).unwrap(), vec![b'y'; 4]);
    assert!(store.num_free_nodes() > free_after_big);
}

#[test]
fn test_set_extend_grows_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    store.set(h, b"short").unwrap();
    store.set(h, &[b'z'; 50]).unwrap();
    assert_eq!(store.get_vec(h).unwrap(), vec![b'z'; 50]);
}

#[test]
fn test_free_reclaims_entry_and_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h1 = store.alloc().unwrap();
    store.set(h1, &[1u8; 40]).unwrap();
    let free_nodes_before = store.num_free_nodes();
    store.free(h1).unwrap();
    assert!(store.num_free_nodes() > free_nodes_before);
    let h2 = store.alloc().unwrap();
    assert_eq!(h2, h1, "entry slot must be recycled LIFO");
}

#[test]
fn test_compare_matches_lexicographic_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    store.set(h, b"banana split with extra toppings").unwrap();
    assert_eq!(store.compare(b"banana split with extra toppings", h).unwrap(), Ordering::Equal);
    assert_eq!(store.compare(b"apple", h).unwrap(), Ordering::Less);
    assert_eq!(store.compare(b"zzz", h).unwrap(), Ordering::Greater);
}

#[test]
fn test_compare_against_a_freshly_allocated_empty_entry() {
    // A just-`alloc`'d entry has length 0 and an INVALID link; comparing
    // against it must not try to validate that link as a node.
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    assert_eq!(store.compare(b"", h).unwrap(), Ordering::Equal);
    assert_eq!(store.compare(b"anything", h).unwrap(), Ordering::Greater);
}

#[test]
fn test_compare2_with_one_side_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let empty = store.alloc().unwrap();
    let filled = store.alloc().unwrap();
    store.set(filled, b"non-empty").unwrap();
    assert_eq!(store.compare2(empty, filled).unwrap(), Ordering::Less);
    assert_eq!(store.compare2(filled, empty).unwrap(), Ordering::Greater);
    let other_empty = store.alloc().unwrap();
    assert_eq!(store.compare2(empty, other_empty).unwrap(), Ordering::Equal);
}

#[test]
fn test_compare2_against_itself_and_other() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h1 = store.alloc().unwrap();
    let h2 = store.alloc().unwrap();
    store.set(h1, b"the quick brown fox jumps").unwrap();
    store.set(h2, b"the quick brown fox jumps").unwrap();
    assert_eq!(store.compare2(h1, h2).unwrap(), Ordering::Equal);
    store.set(h2, b"the quick brown fox leaps").unwrap();
    assert_ne!(store.compare2(h1, h2).unwrap(), Ordering::Equal);
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir, "b");
    {
        let mut store = BlobStore::create(&p, 16, 64).unwrap();
        let h = store.alloc().unwrap();
        store.set(h, b"durable payload").unwrap();
        store.sync().unwrap();
    }
    let store = BlobStore::open(&p).unwrap();
    assert_eq!(store.get_vec(0).unwrap(), b"durable payload");
}

#[test]
fn test_writer_append_resumes_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = BlobStore::create(prefix(&dir, "b"), 16, 64).unwrap();
    let h = store.alloc().unwrap();
    {
        let mut w = store.writer_open(h).unwrap();
        w.write(b"first-").unwrap();
    }
    {
        let mut w = store.writer_append(h).unwrap();
        w.write(b"second").unwrap();
    }
    assert_eq!(store.get_vec(h).unwrap(), b"first-second");
}
