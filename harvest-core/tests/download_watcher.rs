use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use harvest_core::config::DownloadsSection;
use harvest_core::harvest::{newest_file, DirectoryWatcher, DownloadStatus, DownloadWatcher};
use tempfile::tempdir;
use tokio::time::{sleep, Instant};

fn touch(path: &Path, age: Duration) {
    let file = File::create(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn quick_section() -> DownloadsSection {
    DownloadsSection {
        partial_suffixes: vec![".partial".into(), ".crdownload".into()],
        settle_seconds: 0,
        ..DownloadsSection::default()
    }
}

#[test]
fn newest_file_skips_ignored_suffixes_and_directories() {
    let dir = tempdir().unwrap();
    touch(&dir.path().join("old.mp3"), Duration::from_secs(300));
    touch(&dir.path().join("new.mp3"), Duration::from_secs(60));
    touch(&dir.path().join("newer.mp3.crdownload"), Duration::from_secs(5));
    fs::create_dir(dir.path().join("nested")).unwrap();

    let ignore = vec![".crdownload".to_string()];
    let newest = newest_file(dir.path(), &ignore).unwrap().unwrap();
    assert_eq!(newest.path, dir.path().join("new.mp3"));

    let including_partials = newest_file(dir.path(), &[]).unwrap().unwrap();
    assert_eq!(
        including_partials.path,
        dir.path().join("newer.mp3.crdownload")
    );
}

#[test]
fn missing_directory_has_no_files() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("not-there");
    assert_eq!(newest_file(&missing, &[]).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn promotes_partial_file_to_final_name() {
    let dir = tempdir().unwrap();
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();
    assert!(attempt.baseline.is_none());

    let target = dir.path().to_path_buf();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        fs::write(target.join("X.partial"), b"RI").unwrap();
        sleep(Duration::from_secs(4)).await;
        fs::rename(target.join("X.partial"), target.join("X")).unwrap();
    });

    let status = watcher.wait_for_download(&mut attempt).await;
    assert_eq!(status, DownloadStatus::Completed(dir.path().join("X")));
    assert_eq!(attempt.discovered, Some(dir.path().join("X")));
}

#[tokio::test(start_paused = true)]
async fn gives_up_at_ceiling_when_nothing_appears() {
    let dir = tempdir().unwrap();
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();

    let started = Instant::now();
    let status = watcher.wait_for_download(&mut attempt).await;

    assert_eq!(status, DownloadStatus::TimedOut { in_progress: None });
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert!(attempt.discovered.is_none());
}

#[tokio::test(start_paused = true)]
async fn unfinished_partial_times_out_as_in_progress() {
    let dir = tempdir().unwrap();
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();
    let partial = dir.path().join("call9.mp3.crdownload");
    fs::write(&partial, b"RI").unwrap();

    let started = Instant::now();
    let status = watcher.wait_for_download(&mut attempt).await;

    assert_eq!(
        status,
        DownloadStatus::TimedOut {
            in_progress: Some(partial)
        }
    );
    assert!(started.elapsed() <= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn files_older_than_the_click_do_not_count() {
    let dir = tempdir().unwrap();
    touch(&dir.path().join("yesterday.mp3"), Duration::from_secs(86_400));
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();
    assert_eq!(
        attempt.baseline.as_ref().map(|stamp| stamp.path.clone()),
        Some(dir.path().join("yesterday.mp3"))
    );

    let status = watcher.wait_for_download(&mut attempt).await;
    assert_eq!(status, DownloadStatus::TimedOut { in_progress: None });
}

#[tokio::test(start_paused = true)]
async fn file_stamped_just_before_the_click_is_accepted() {
    let dir = tempdir().unwrap();
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();

    // The browser's clock may trail ours by up to the skew tolerance.
    let saved = dir.path().join("call5.mp3");
    touch(&saved, Duration::from_millis(500));

    let status = watcher.wait_for_download(&mut attempt).await;
    assert_eq!(status, DownloadStatus::Completed(saved));
}

#[tokio::test(start_paused = true)]
async fn unchanged_baseline_file_is_not_reported_again() {
    let dir = tempdir().unwrap();
    // Fresh enough to pass the clock-skew window, but it predates the click.
    fs::write(dir.path().join("previous.mp3"), b"RIFF").unwrap();
    let watcher = DirectoryWatcher::new(dir.path(), &quick_section());
    let mut attempt = watcher.begin();

    let status = watcher.wait_for_download(&mut attempt).await;
    assert_eq!(status, DownloadStatus::TimedOut { in_progress: None });
}

#[test]
fn prepare_creates_download_directory() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("recordings").join("2025");
    let watcher = DirectoryWatcher::new(&nested, &quick_section());
    watcher.prepare().unwrap();
    assert!(nested.is_dir());
}
