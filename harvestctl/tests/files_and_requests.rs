use std::fs::{self, File};
use std::time::{Duration, SystemTime};

use harvest_core::RequestError;
use harvestctl::commands::files;
use harvestctl::commands::harvest::HarvestArgs;
use harvestctl::AppError;
use tempfile::tempdir;

fn args() -> HarvestArgs {
    HarvestArgs {
        destination: Some("0215550100".into()),
        start_date: Some("2025-03-01".into()),
        end_date: Some("2025-03-02".into()),
        request: None,
    }
}

#[test]
fn request_payload_file_is_parsed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pull.json");
    fs::write(
        &path,
        r#"{"destination": "0215550100", "start_date": "2025-03-01", "end_date": "2025-03-01"}"#,
    )
    .unwrap();

    let request = HarvestArgs {
        request: Some(path),
        destination: None,
        start_date: None,
        end_date: None,
    }
    .to_request()
    .unwrap();

    assert_eq!(request.start_bound(), "2025-03-01 00:00");
    assert_eq!(request.end_bound(), "2025-03-01 23:59");
}

#[test]
fn missing_flag_is_rejected_before_launch() {
    let err = HarvestArgs {
        end_date: None,
        ..args()
    }
    .to_request()
    .unwrap_err();
    assert!(matches!(
        err,
        AppError::Request(RequestError::MissingField("end_date"))
    ));
}

#[test]
fn malformed_payload_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pull.json");
    fs::write(&path, "{not json").unwrap();

    let err = HarvestArgs {
        request: Some(path),
        ..args()
    }
    .to_request()
    .unwrap_err();
    assert!(matches!(
        err,
        AppError::Request(RequestError::InvalidPayload(_))
    ));
}

#[test]
fn get_copies_file_by_bare_name() {
    let downloads = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(downloads.path().join("call123.mp3"), b"RIFFDATA").unwrap();

    let target = out.path().join("copy.mp3");
    let copied = files::get(downloads.path(), "call123.mp3", Some(target.as_path())).unwrap();

    assert_eq!(copied.size_bytes, 8);
    assert_eq!(fs::read(&target).unwrap(), b"RIFFDATA");
}

#[test]
fn get_rejects_names_that_leave_the_directory() {
    let downloads = tempdir().unwrap();
    for name in ["../secret.txt", "nested/call.mp3", "..", "", "/etc/passwd", "call..mp3"] {
        let err = files::resolve_name(downloads.path(), name).unwrap_err();
        assert!(
            matches!(err, AppError::InvalidFileName(_)),
            "{name:?} should be rejected, got {err:?}"
        );
    }
}

#[test]
fn get_reports_missing_file() {
    let downloads = tempdir().unwrap();
    let err = files::resolve_name(downloads.path(), "absent.mp3").unwrap_err();
    assert!(matches!(err, AppError::MissingFile(name) if name == "absent.mp3"));
}

#[test]
fn list_is_newest_first_and_marks_partials() {
    let downloads = tempdir().unwrap();
    let now = SystemTime::now();
    for (name, age) in [("old.mp3", 600), ("new.mp3", 60), ("next.mp3.crdownload", 1)] {
        let file = File::create(downloads.path().join(name)).unwrap();
        file.set_modified(now - Duration::from_secs(age)).unwrap();
    }
    fs::create_dir(downloads.path().join("subdir")).unwrap();

    let listing = files::list(downloads.path(), &[".crdownload".to_string()]).unwrap();

    let names: Vec<_> = listing.files.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, ["next.mp3.crdownload", "new.mp3", "old.mp3"]);
    assert!(listing.files[0].in_progress);
    assert!(!listing.files[1].in_progress);
}

#[test]
fn list_of_missing_directory_is_empty() {
    let downloads = tempdir().unwrap();
    let listing = files::list(&downloads.path().join("none"), &[]).unwrap();
    assert!(listing.files.is_empty());
}

#[cfg(unix)]
#[test]
fn list_skips_entries_gone_before_stat() {
    let downloads = tempdir().unwrap();
    fs::write(downloads.path().join("kept.mp3"), b"RIFF").unwrap();
    // Stat of a dangling link fails with NotFound, like a partial renamed mid-listing.
    std::os::unix::fs::symlink(
        downloads.path().join("gone.mp3"),
        downloads.path().join("gone.mp3.crdownload"),
    )
    .unwrap();

    let listing = files::list(downloads.path(), &[".crdownload".to_string()]).unwrap();

    let names: Vec<_> = listing.files.iter().map(|file| file.name.as_str()).collect();
    assert_eq!(names, ["kept.mp3"]);
}
