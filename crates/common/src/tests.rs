use super::*;
use std::io;

#[test]
fn config_defaults_are_sane() {
    let cfg = Config::default();
    assert_eq!(cfg.page_size, 4096);
    assert_eq!(cfg.buffer_pool_pages, 256);
}

#[test]
fn db_error_formats_cleanly() {
    let err = DbError::Storage("corruption".into());
    assert!(format!("{err}").contains("storage"));
}

#[test]
fn page_id_invalid_is_not_valid() {
    assert!(!PageId::INVALID.is_valid());
    assert!(PageId(0).is_valid());
    assert_eq!(PageId::default(), PageId::INVALID);
}

#[test]
fn row_round_trips_values() {
    let row = Row::new(vec![Value::Int(1), Value::Text("Will".into())]);
    assert_eq!(row.rid(), None);

    let rid = RecordId {
        page_id: PageId(3),
        slot: 7,
    };
    let row = row.with_rid(rid);
    assert_eq!(row.rid(), Some(rid));
    assert_eq!(row.into_values(), vec![Value::Int(1), Value::Text("Will".into())]);
}

#[test]
fn buffer_manager_errors_carry_identity() {
    let file = FileId(1);
    let page = PageId(2);
    let err = DbError::PageNotPinned {
        file,
        page,
        frame: 5,
    };
    assert!(format!("{err}").contains("frame=5"));

    let err = DbError::BufferExceeded;
    assert!(format!("{err}").contains("clock sweep"));
}

#[test]
fn io_error_converts() {
    let e = io::Error::other("oops");
    let db_err: DbError = e.into();
    assert!(matches!(db_err, DbError::Io(_)));
}
