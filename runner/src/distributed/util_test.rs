use super::util::{device_id, move_file, with_file_name_of, Moved};
use std::{fs, path::Path};

#[test]
pub fn move_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("a.cfg");
    let to = dir.path().join("b.cfg");
    fs::write(&from, "{}").unwrap();

    assert_eq!(move_file(&from, &to).unwrap(), Moved::Moved);
    assert!(!from.exists());
    assert!(to.exists());
}

#[test]
pub fn move_vanished_file() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("gone.cfg");
    let to = dir.path().join("b.cfg");

    assert_eq!(move_file(&from, &to).unwrap(), Moved::Vanished);
}

#[test]
pub fn move_into_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("a.cfg");
    let to = dir.path().join("missing").join("a.cfg");
    fs::write(&from, "{}").unwrap();

    assert!(move_file(&from, &to).is_err());
    assert!(from.exists());
}

#[test]
pub fn same_device_for_siblings() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("one")).unwrap();
    fs::create_dir(dir.path().join("two")).unwrap();

    assert_eq!(
        device_id(&dir.path().join("one")).unwrap(),
        device_id(&dir.path().join("two")).unwrap()
    );
}

#[test]
pub fn reparent_file_name() {
    assert_eq!(
        with_file_name_of(Path::new("/jobs/done"), Path::new("/jobs/wip/abc.cfg")),
        Path::new("/jobs/done/abc.cfg")
    );
}
