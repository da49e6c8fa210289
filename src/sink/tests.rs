use super::{MountedSink, RemoteSink, SinkError, timestamped_remote_path};
use chrono::NaiveDate;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_timestamped_remote_path() {
    let at = NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(14, 5, 7)
        .unwrap();

    assert_eq!(
        timestamped_remote_path("/user/cloudera/recog_img/", at, "png"),
        "/user/cloudera/recog_img/2024-03-09 14:05:07.png"
    );
    assert_eq!(
        timestamped_remote_path("/out", at, ".jpg"),
        "/out/2024-03-09 14:05:07.jpg"
    );
    assert_eq!(timestamped_remote_path("/out", at, ""), "/out/2024-03-09 14:05:07");
}

#[tokio::test]
async fn test_copy_into_existing_remote_dir() {
    let local_dir = tempdir().unwrap();
    let mount = tempdir().unwrap();
    let local = local_dir.path().join("result.png");
    fs::write(&local, b"png bytes").unwrap();
    fs::create_dir_all(mount.path().join("user/cloudera")).unwrap();

    let sink = MountedSink::new(mount.path());
    let bytes = sink
        .copy_from_local(&local, "/user/cloudera/result.png")
        .await
        .unwrap();

    assert_eq!(bytes, 9);
    let copied = fs::read(mount.path().join("user/cloudera/result.png")).unwrap();
    assert_eq!(copied, b"png bytes");
}

#[tokio::test]
async fn test_missing_remote_dir_is_not_created() {
    let local_dir = tempdir().unwrap();
    let mount = tempdir().unwrap();
    let local = local_dir.path().join("result.png");
    fs::write(&local, b"png bytes").unwrap();

    let sink = MountedSink::new(mount.path());
    let err = sink
        .copy_from_local(&local, "/user/absent/result.png")
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::MissingRemoteDir { .. }));
    assert!(!mount.path().join("user").exists());
}

#[tokio::test]
async fn test_missing_local_file_is_reported() {
    let mount = tempdir().unwrap();
    let sink = MountedSink::new(mount.path());
    let err = sink
        .copy_from_local(&mount.path().join("nope.png"), "/nope.png")
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Local { .. }));
}
