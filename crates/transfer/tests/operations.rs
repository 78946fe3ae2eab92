use std::sync::Arc;

use ftm_protocol::{Command, ProtocolVersion};
use ftm_test_utils::{ScriptedTransport, SimulatedDevice};
use ftm_transfer::{
    DirectoryEntry, FileTransferEngine, LOCAL_VERSION, ProtocolError, RemoteError, TransferError,
    TransferOptions,
};

fn device_engine(
    device: SimulatedDevice,
) -> (Arc<SimulatedDevice>, FileTransferEngine<Arc<SimulatedDevice>>) {
    let device = Arc::new(device);
    (Arc::clone(&device), FileTransferEngine::new(device))
}

#[tokio::test]
async fn listing_returns_files_and_directories_in_order() {
    let (_, engine) = device_engine(
        SimulatedDevice::new()
            .with_file("/a", b"1".to_vec())
            .with_dir("/b")
            .with_file("/b/nested", b"2".to_vec()),
    );

    let root = engine.list("/").await.unwrap();
    assert_eq!(
        root,
        vec![DirectoryEntry::file("a"), DirectoryEntry::dir("b")]
    );

    let nested = engine.list("/b").await.unwrap();
    assert_eq!(nested, vec![DirectoryEntry::file("nested")]);
}

#[tokio::test]
async fn listing_a_missing_directory_fails() {
    let (_, engine) = device_engine(SimulatedDevice::new());
    let err = engine.list("/nowhere").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::DirOpenFailed));
}

#[tokio::test]
async fn listing_skips_unknown_entry_kinds() {
    let transport = ScriptedTransport::new(64);
    transport
        .push(*b"\x00\x01a")
        .push(*b"\x00\x09?")
        .push(*b"\x00\x02b")
        .push([0x00, 0x00]);

    let engine = FileTransferEngine::new(transport);
    let entries = engine.list("/").await.unwrap();
    assert_eq!(
        entries,
        vec![DirectoryEntry::file("a"), DirectoryEntry::dir("b")]
    );
    assert_eq!(engine.transport().count(Command::DirList), 4);
}

#[tokio::test]
async fn directory_lifecycle() {
    let (device, engine) = device_engine(SimulatedDevice::new());

    engine.mkdir("/logs").await.unwrap();
    assert!(engine.exists("/logs").await.unwrap());
    assert!(device.has_dir("/logs"));

    let err = engine.mkdir("/logs").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::DirCreateFailed));

    engine.rmdir("/logs").await.unwrap();
    assert!(!engine.exists("/logs").await.unwrap());

    let err = engine.rmdir("/logs").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::DirDeleteFailed));
}

#[tokio::test]
async fn file_rename_and_delete() {
    let (device, engine) =
        device_engine(SimulatedDevice::new().with_file("/old.txt", b"x".to_vec()));

    engine.rename("/old.txt", "/new.txt").await.unwrap();
    assert!(!engine.exists("/old.txt").await.unwrap());
    assert_eq!(device.file("/new.txt"), Some(b"x".to_vec()));

    let err = engine.rename("/old.txt", "/other.txt").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::FileRenameFailed));

    engine.delete("/new.txt").await.unwrap();
    let err = engine.delete("/new.txt").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::FileDeleteFailed));
}

#[tokio::test]
async fn info_of_missing_file_is_rejected() {
    let (_, engine) = device_engine(SimulatedDevice::new());
    let err = engine.info("/ghost").await.unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::FileOpenFailed));
}

#[tokio::test]
async fn format_wipes_everything() {
    let (device, engine) = device_engine(
        SimulatedDevice::new()
            .with_file("/a/b", b"1".to_vec())
            .with_file("/c", b"2".to_vec()),
    );
    engine.format().await.unwrap();
    assert!(engine.list("/").await.unwrap().is_empty());
    assert!(!device.has_dir("/a"));
}

#[tokio::test]
async fn overlong_paths_never_reach_the_device() {
    let (device, engine) = device_engine(SimulatedDevice::new().with_max_frame_length(16));
    let long = "/a/rather/long/path.txt";

    let results = [
        engine.exists(long).await.err(),
        engine.delete(long).await.err(),
        engine.info(long).await.err(),
        engine.mkdir(long).await.err(),
        engine.rmdir(long).await.err(),
        engine.rename("/a", long).await.err(),
        engine.list(long).await.err(),
        engine
            .upload_bytes(long, b"x", &TransferOptions::default())
            .await
            .err(),
        engine
            .download_to_vec(long, &TransferOptions::default())
            .await
            .err(),
    ];

    for err in results {
        assert!(
            matches!(
                err,
                Some(TransferError::Protocol(ProtocolError::PathTooLong { max: 16, .. }))
            ),
            "unexpected result: {err:?}"
        );
    }
    assert!(device.calls().is_empty());
}

#[tokio::test]
async fn path_at_the_frame_limit_is_accepted() {
    // "/abcdef" + NUL = 8 bytes, plus 2 bytes of framing = 10.
    let (device, engine) = device_engine(SimulatedDevice::new().with_max_frame_length(10));
    assert!(!engine.exists("/abcdef").await.unwrap());
    assert_eq!(device.count(Command::Exists), 1);

    let err = engine.exists("/abcdefg").await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::Protocol(ProtocolError::PathTooLong {
            required: 11,
            max: 10
        })
    ));
}

#[tokio::test]
async fn version_gate_rejects_other_major() {
    let (_, engine) =
        device_engine(SimulatedDevice::new().with_version(ProtocolVersion::new(2, 0, 0)));

    let version = engine.get_version().await.unwrap();
    assert_eq!(version.to_string(), "2.0.0");

    let err = engine.check_version().await.unwrap_err();
    match err {
        TransferError::IncompatibleVersion { remote, local } => {
            assert_eq!(remote.major, 2);
            assert_eq!(local, LOCAL_VERSION);
        }
        other => panic!("expected IncompatibleVersion, got {other:?}"),
    }
}

#[tokio::test]
async fn version_gate_accepts_same_major() {
    let (_, engine) =
        device_engine(SimulatedDevice::new().with_version(ProtocolVersion::new(1, 7, 42)));
    let version = engine.check_version().await.unwrap();
    assert_eq!(version, ProtocolVersion::new(1, 7, 42));
}

#[tokio::test]
async fn explicit_cancel_closes_open_transfer() {
    let (device, engine) =
        device_engine(SimulatedDevice::new().with_file("/f", vec![7u8; 10]));
    // Open a download by hand, then abandon it.
    ftm_transfer::Transport::invoke(
        &*device,
        ftm_protocol::OBJECT_INDEX,
        Command::FileDownload.code(),
        Some(&ftm_protocol::codec::encode_transfer_header(20, "/f", 64).unwrap()),
        true,
    )
    .await
    .unwrap();
    assert!(device.has_open_transfer());

    engine.cancel().await.unwrap();
    assert!(!device.has_open_transfer());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_engines_run_concurrently() {
    let first = Arc::new(SimulatedDevice::new());
    let second = Arc::new(SimulatedDevice::new().with_max_frame_length(40));

    let a: Vec<u8> = (0..2000).map(|i| (i % 7) as u8).collect();
    let b: Vec<u8> = (0..1500).map(|i| (i % 13) as u8).collect();

    let task_a = {
        let engine = FileTransferEngine::new(Arc::clone(&first));
        let data = a.clone();
        tokio::spawn(async move {
            engine
                .upload_bytes("/a.bin", &data, &TransferOptions::default())
                .await
        })
    };
    let task_b = {
        let engine = FileTransferEngine::new(Arc::clone(&second));
        let data = b.clone();
        tokio::spawn(async move {
            engine
                .upload_bytes("/b.bin", &data, &TransferOptions::default())
                .await
        })
    };

    let (ra, rb) = tokio::join!(task_a, task_b);
    assert_eq!(ra.unwrap().unwrap().bytes, 2000);
    assert_eq!(rb.unwrap().unwrap().bytes, 1500);

    assert_eq!(first.file("/a.bin"), Some(a));
    assert_eq!(second.file("/b.bin"), Some(b));
    assert_eq!(first.file("/b.bin"), None);
}
