use super::*;
use common::PageId;
use tempfile::tempdir;
use types::Value;

#[test]
fn insert_and_get_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let row = Row::new(vec![
        Value::Int(1),
        Value::Text("Will".into()),
        Value::Int(27),
    ]);

    let rid = table.insert(&row).unwrap();
    let fetched = table.get(rid).unwrap();

    assert_eq!(fetched.values, row.values);
}

#[test]
fn delete_marks_slot_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let row = Row::new(vec![Value::Int(1)]);
    let rid = table.insert(&row).unwrap();
    table.delete(rid).unwrap();

    let err = table.get(rid).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
}

#[test]
fn large_rows_allocate_new_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let big_payload = "x".repeat(PAGE_SIZE - 256);
    let row = Row::new(vec![Value::Text(big_payload.clone())]);

    let rid_a = table.insert(&row).unwrap();
    let rid_b = table.insert(&row).unwrap();

    assert!(rid_b.page_id.0 > rid_a.page_id.0);

    let fetched = table.get(rid_b).unwrap();
    assert_eq!(fetched.values, vec![Value::Text(big_payload)]);
}

#[test]
fn delete_twice_returns_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let row = Row::new(vec![Value::Int(7)]);
    let rid = table.insert(&row).unwrap();

    table.delete(rid).unwrap();
    let err = table.delete(rid).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
}

#[test]
fn get_rejects_invalid_slot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let row = Row::new(vec![Value::Int(1)]);
    let rid = table.insert(&row).unwrap();

    let bogus = RecordId {
        page_id: rid.page_id,
        slot: rid.slot + 5,
    };

    let err = table.get(bogus).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
}

#[test]
fn heap_scan_returns_every_live_row() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("heap.tbl");
    let mut table = HeapFile::open(&path, 1).unwrap();

    let mut rids = Vec::new();
    for i in 0..5 {
        rids.push(table.insert(&Row::new(vec![Value::Int(i)])).unwrap());
    }
    table.delete(rids[2]).unwrap();

    let scanned = table.scan().unwrap();
    assert_eq!(scanned.len(), 4);
    assert!(scanned.iter().all(|(rid, _)| *rid != rids[2]));
}

#[test]
fn disk_paged_file_allocate_read_write_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.dat");
    let mut file = DiskPagedFile::create(&path).unwrap();

    let mut page = file.allocate_page().unwrap();
    assert_eq!(page.id, PageId(0));
    page.data[0..4].copy_from_slice(&[9, 8, 7, 6]);
    file.write_page(&page).unwrap();

    let reread = file.read_page(PageId(0)).unwrap();
    assert_eq!(&reread.data[0..4], &[9, 8, 7, 6]);
}

#[test]
fn disk_paged_file_reuses_disposed_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.dat");
    let mut file = DiskPagedFile::create(&path).unwrap();

    let p0 = file.allocate_page().unwrap();
    let _p1 = file.allocate_page().unwrap();
    file.dispose_page(p0.id).unwrap();

    let reused = file.allocate_page().unwrap();
    assert_eq!(reused.id, p0.id);
    assert_eq!(file.allocated_page_nos().len(), 2);
}

#[test]
fn disk_paged_file_rejects_double_dispose() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.dat");
    let mut file = DiskPagedFile::create(&path).unwrap();

    let p0 = file.allocate_page().unwrap();
    file.dispose_page(p0.id).unwrap();
    let err = file.dispose_page(p0.id).unwrap_err();
    assert!(matches!(err, DbError::Storage(_)));
}

#[test]
fn disk_paged_file_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.dat");

    {
        let mut file = DiskPagedFile::create(&path).unwrap();
        let mut page = file.allocate_page().unwrap();
        page.data[0] = 42;
        file.write_page(&page).unwrap();
    }

    let mut reopened = DiskPagedFile::open(&path).unwrap();
    let page = reopened.read_page(PageId(0)).unwrap();
    assert_eq!(page.data[0], 42);
}
