//! Unit tests for script folder import, write and removal.

use std::collections::HashSet;

use pw_session_engine::codec::encode;
use pw_session_engine::importer::{scan, script_file_name, ScriptFolder};
use pw_session_engine::models::account::Account;

fn logins(list: &[&str]) -> HashSet<String> {
    list.iter().map(|l| (*l).to_owned()).collect()
}

#[test]
fn known_login_is_counted_as_duplicate() {
    let dir = tempfile::tempdir().expect("tempdir");
    ScriptFolder::new(dir.path())
        .write(&Account::new("alice", "secret"), "elementclient.exe")
        .expect("write");

    let report = scan(dir.path(), &logins(&["alice"])).expect("scan");

    assert!(report.imported.is_empty());
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.unreadable, 0);
}

#[test]
fn new_logins_are_imported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = ScriptFolder::new(dir.path());
    folder
        .write(&Account::new("alice", "a").with_character("Mage"), "elementclient.exe")
        .expect("write");
    folder
        .write(&Account::new("bob", "b"), "elementclient.exe")
        .expect("write");

    let report = scan(dir.path(), &HashSet::new()).expect("scan");

    let mut found: Vec<&str> = report.imported.iter().map(|a| a.login.as_str()).collect();
    found.sort_unstable();
    assert_eq!(found, vec!["alice", "bob"]);
    assert_eq!(report.duplicates, 0);
}

#[test]
fn repeated_login_within_folder_is_duplicate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let text = encode(&Account::new("alice", "a"), "elementclient.exe");
    std::fs::write(dir.path().join("first.bat"), &text).expect("write");
    std::fs::write(dir.path().join("second.cmd"), &text).expect("write");

    let report = scan(dir.path(), &HashSet::new()).expect("scan");

    assert_eq!(report.imported.len(), 1);
    assert_eq!(report.duplicates, 1);
}

#[test]
fn undecodable_and_foreign_files_are_handled() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("broken.bat"), "@echo off\nnotepad.exe\n").expect("write");
    std::fs::write(dir.path().join("readme.txt"), "not a script").expect("write");
    std::fs::write(
        dir.path().join("UPPER.BAT"),
        encode(&Account::new("carol", "c"), "elementclient.exe"),
    )
    .expect("write");
    std::fs::create_dir(dir.path().join("nested.bat")).expect("mkdir");

    let report = scan(dir.path(), &HashSet::new()).expect("scan");

    assert_eq!(report.imported.len(), 1, "upper-case extension matches");
    assert_eq!(report.imported[0].login, "carol");
    assert_eq!(report.unreadable, 1, "txt files and directories are ignored");
}

#[test]
fn scan_is_not_recursive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sub = dir.path().join("old");
    std::fs::create_dir(&sub).expect("mkdir");
    ScriptFolder::new(&sub)
        .write(&Account::new("dave", "d"), "elementclient.exe")
        .expect("write");

    let report = scan(dir.path(), &HashSet::new()).expect("scan");
    assert!(report.imported.is_empty());
}

#[test]
fn entries_can_be_restarted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = ScriptFolder::new(dir.path());
    folder
        .write(&Account::new("erin", "e"), "elementclient.exe")
        .expect("write");

    let first = folder.entries().expect("entries").count();
    let second = folder.entries().expect("entries").count();
    assert_eq!(first, 1);
    assert_eq!(second, 1);
}

#[test]
fn missing_folder_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(scan(&dir.path().join("absent"), &HashSet::new()).is_err());
}

#[test]
fn write_replaces_own_script_and_avoids_foreign_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = ScriptFolder::new(dir.path());

    let first = folder
        .write(&Account::new("frank", "old"), "elementclient.exe")
        .expect("write");
    let again = folder
        .write(&Account::new("frank", "new"), "elementclient.exe")
        .expect("rewrite");
    assert_eq!(first, again);
    assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("account_frank.bat"));

    // A file already at frank.x's default name belongs to someone else.
    std::fs::write(
        dir.path().join(script_file_name("frank.x")),
        encode(&Account::new("frank_x", "pw"), "elementclient.exe"),
    )
    .expect("write");
    let other = folder
        .write(&Account::new("frank.x", "pw"), "elementclient.exe")
        .expect("write");
    assert_ne!(other, dir.path().join("account_frank_x.bat"));
}

#[test]
fn imported_cyrillic_login_can_be_written_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut bytes = b"start elementclient.exe startbypatcher user:".to_vec();
    // "Вася" in Windows-1251.
    bytes.extend_from_slice(&[0xC2, 0xE0, 0xF1, 0xFF]);
    bytes.extend_from_slice(b" pwd:pw\r\n");
    std::fs::write(dir.path().join("legacy.bat"), bytes).expect("write");

    let report = scan(dir.path(), &HashSet::new()).expect("scan");
    assert_eq!(report.imported.len(), 1);
    let account = &report.imported[0];
    assert_eq!(account.login, "Вася");

    let path = ScriptFolder::new(dir.path())
        .write(account, "elementclient.exe")
        .expect("write imported account");
    let text = std::fs::read_to_string(path).expect("read");
    assert!(text.contains("user:Вася pwd:pw"));
}

#[test]
fn write_rejects_invalid_account() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = ScriptFolder::new(dir.path()).write(&Account::new("x", ""), "elementclient.exe");
    assert!(result.is_err());
}

#[test]
fn remove_for_deletes_matching_scripts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let folder = ScriptFolder::new(dir.path());
    folder
        .write(&Account::new("gina", "g"), "elementclient.exe")
        .expect("write");
    std::fs::write(
        dir.path().join("gina_copy.cmd"),
        encode(&Account::new("gina", "g"), "elementclient.exe"),
    )
    .expect("write");
    folder
        .write(&Account::new("hank", "h"), "elementclient.exe")
        .expect("write");

    assert_eq!(folder.remove_for("gina").expect("remove"), 2);
    assert_eq!(folder.remove_for("gina").expect("remove again"), 0);
    assert!(dir.path().join("account_hank.bat").exists());
}

#[test]
fn script_file_name_sanitises_login() {
    assert_eq!(script_file_name("alice"), "account_alice.bat");
    assert_eq!(script_file_name("a.b c"), "account_a_b_c.bat");
}
