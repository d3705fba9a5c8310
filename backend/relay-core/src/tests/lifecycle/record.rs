use crate::lifecycle::LivenessRecord;

use tempfile::TempDir;

#[test]
fn given_written_pid_when_read_then_same_pid_returned() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let record = LivenessRecord::in_dir(dir.path());

    // WHEN
    record.write(0x1a2b).unwrap();

    // THEN
    assert_eq!(record.read(), Some(0x1a2b));
    let contents = std::fs::read_to_string(record.path()).unwrap();
    assert!(contents.contains("[process]"));
    assert!(contents.contains(r#"pid = "0x1a2b""#));
}

#[test]
fn given_missing_file_when_read_then_none() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let record = LivenessRecord::in_dir(dir.path());

    // WHEN / THEN
    assert_eq!(record.read(), None);
}

#[test]
fn given_hex_without_prefix_when_read_then_parsed() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let record = LivenessRecord::in_dir(dir.path());
    std::fs::write(record.path(), "[process]\npid = \"FF\"\n").unwrap();

    // WHEN / THEN
    assert_eq!(record.read(), Some(255));
}

/// **VALUE**: Corrupt or meaningless records are treated as "no worker".
///
/// **BUG THIS CATCHES**: Killing PID 0 (or whatever a bad parse yields)
/// while clearing a stale holder.
#[test]
fn given_invalid_records_when_read_then_none() {
    let dir = TempDir::new().unwrap();
    let record = LivenessRecord::in_dir(dir.path());

    for contents in [
        "not toml at all [",
        "[process]\npid = \"zz\"\n",
        "[process]\npid = \"0x0\"\n",
        "[other]\npid = \"0x10\"\n",
    ] {
        // GIVEN
        std::fs::write(record.path(), contents).unwrap();

        // WHEN / THEN
        assert_eq!(record.read(), None, "{contents:?} should not parse");
    }
}

#[test]
fn given_record_when_cleared_twice_then_file_gone_and_no_panic() {
    // GIVEN
    let dir = TempDir::new().unwrap();
    let record = LivenessRecord::in_dir(dir.path());
    record.write(42).unwrap();

    // WHEN
    record.clear();
    record.clear();

    // THEN
    assert!(!record.path().exists());
}
