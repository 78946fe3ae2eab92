use std::sync::Arc;

use ftm_protocol::Command;
use ftm_test_utils::{Fault, FaultRule, SimulatedDevice};
use ftm_transfer::{
    EngineConfig, FileTransferEngine, RemoteError, TransferError, TransferEvent, TransferOptions,
    Transport, TransportError, TransportFuture,
};

/// Yields to the runtime before every exchange, so other futures on the
/// same task get to run while a transfer is in flight.
struct Yielding(Arc<SimulatedDevice>);

impl Transport for Yielding {
    fn invoke<'a>(
        &'a self,
        object_index: u8,
        command: u8,
        payload: Option<&'a [u8]>,
        wait_for_response: bool,
    ) -> TransportFuture<'a, Vec<u8>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0
                .invoke(object_index, command, payload, wait_for_response)
                .await
        })
    }

    fn max_frame_length(&self) -> usize {
        self.0.max_frame_length()
    }

    fn reconnect(&self) -> TransportFuture<'_, ()> {
        self.0.reconnect()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

fn engine_with(
    device: SimulatedDevice,
    max_attempts: u32,
) -> (Arc<SimulatedDevice>, FileTransferEngine<Arc<SimulatedDevice>>) {
    let device = Arc::new(device);
    let config = EngineConfig {
        max_attempts,
        ..Default::default()
    };
    let engine = FileTransferEngine::new(Arc::clone(&device)).with_config(config);
    (device, engine)
}

#[tokio::test]
async fn transient_failures_exhaust_the_attempt_budget() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 3);
    device.inject(
        FaultRule::new(Command::FileUpload, Fault::Error(TransportError::Timeout))
            .skip(1)
            .times(3),
    );

    let err = engine
        .upload_bytes("/f", &pattern(10), &TransferOptions::default())
        .await
        .unwrap_err();

    match err {
        TransferError::TooManyErrors { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last,
                TransferError::Transport(TransportError::Timeout)
            ));
        }
        other => panic!("expected TooManyErrors, got {other:?}"),
    }
    // Header plus exactly three attempts at the first chunk.
    assert_eq!(device.count(Command::FileUpload), 4);
}

#[tokio::test]
async fn a_transient_failure_within_budget_is_recovered() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 3);
    device.inject(
        FaultRule::new(Command::FileUpload, Fault::Error(TransportError::Timeout))
            .skip(1)
            .times(2),
    );

    let data = pattern(10);
    let summary = engine
        .upload_bytes("/f", &data, &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.retries, 2);
    assert_eq!(device.file("/f"), Some(data));
}

#[tokio::test]
async fn remote_rejection_is_not_retried() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);
    device.inject(FaultRule::new(Command::FileUpload, Fault::Status(0x47)).skip(1));

    let err = engine
        .upload_bytes("/f", &pattern(10), &TransferOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.remote_error(), Some(RemoteError::IncompleteWrite));
    assert_eq!(device.count(Command::FileUpload), 2);
}

#[tokio::test]
async fn unknown_status_is_fatal() {
    let (device, engine) = engine_with(SimulatedDevice::new().with_file("/f", pattern(5)), 4);
    device.inject(FaultRule::new(Command::FileDownload, Fault::Status(0x7E)).skip(1));

    let err = engine
        .download_to_vec("/f", &TransferOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Protocol(ftm_transfer::ProtocolError::UnknownStatusCode(0x7E))
    ));
    assert_eq!(device.count(Command::FileDownload), 2);
}

#[tokio::test]
async fn lost_upload_ack_is_recovered_without_duplicating_data() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);
    // Lose the acknowledgement of the second chunk.
    device.inject(FaultRule::new(Command::FileUpload, Fault::LoseResponse).skip(2));

    let data = pattern(200);
    let summary = engine
        .upload_bytes("/f", &data, &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.retries, 1);
    assert_eq!(device.file("/f"), Some(data));
}

#[tokio::test]
async fn corrupted_upload_ack_is_retried() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);
    device.inject(FaultRule::new(Command::FileUpload, Fault::CorruptCrc).skip(1));

    let data = pattern(100);
    engine
        .upload_bytes("/f", &data, &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(device.file("/f"), Some(data));
}

#[tokio::test]
async fn corrupted_download_chunk_is_retried() {
    let data = pattern(300);
    let (device, mut engine) =
        engine_with(SimulatedDevice::new().with_file("/f", data.clone()), 4);
    device.inject(FaultRule::new(Command::FileDownload, Fault::CorruptCrc).skip(2));

    let retries = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let retries = Arc::clone(&retries);
        engine.on_event(Box::new(move |e| {
            if let TransferEvent::Retry { sequence, error, .. } = e {
                retries.lock().unwrap().push((*sequence, error.clone()));
            }
        }));
    }

    let out = engine
        .download_to_vec("/f", &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(out, data);

    let retries = retries.lock().unwrap();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].0, 2);
    assert!(retries[0].1.contains("checksum mismatch"));
}

#[tokio::test]
async fn lost_download_response_is_served_again() {
    let data = pattern(150);
    let (device, engine) = engine_with(SimulatedDevice::new().with_file("/f", data.clone()), 4);
    device.inject(FaultRule::new(Command::FileDownload, Fault::LoseResponse).skip(1));

    let out = engine
        .download_to_vec("/f", &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn disconnect_triggers_reconnect_and_resumes() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);
    device.inject(FaultRule::new(Command::FileUpload, Fault::Disconnect).skip(2));

    let data = pattern(180);
    engine
        .upload_bytes("/f", &data, &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(device.reconnects(), 1);
    assert_eq!(device.file("/f"), Some(data));
}

#[tokio::test]
async fn failed_reconnects_count_toward_the_budget() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);
    device.inject(FaultRule::new(Command::FileUpload, Fault::Disconnect).skip(1));
    device.refuse_reconnects(10);

    let err = engine
        .upload_bytes("/f", &pattern(10), &TransferOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::TooManyErrors { attempts: 4, .. }));
    // Header plus two chunk invokes; the other two attempts were reconnects.
    assert_eq!(device.count(Command::FileUpload), 3);
    assert_eq!(device.reconnects(), 2);
}

#[tokio::test]
async fn reconnect_can_be_disabled() {
    let device = Arc::new(SimulatedDevice::new());
    let config = EngineConfig {
        reconnect_on_disconnect: false,
        max_attempts: 2,
        ..Default::default()
    };
    let engine = FileTransferEngine::new(Arc::clone(&device)).with_config(config);
    device.inject(FaultRule::new(Command::FileUpload, Fault::Disconnect).skip(1));

    let err = engine
        .upload_bytes("/f", &pattern(10), &TransferOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::TooManyErrors { attempts: 2, .. }));
    assert_eq!(device.reconnects(), 0);
}

#[tokio::test]
async fn cancellation_stops_at_next_chunk_boundary() {
    let device = Arc::new(SimulatedDevice::new());
    let mut engine = FileTransferEngine::new(Arc::clone(&device));
    let token = engine.cancellation_token();
    engine.on_event(Box::new(move |e| {
        if matches!(e, TransferEvent::Progress(_)) {
            token.cancel();
        }
    }));

    let err = engine
        .upload_bytes("/f", &pattern(500), &TransferOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    // Header and one chunk, then the cancel; no further chunks.
    assert_eq!(device.count(Command::FileUpload), 2);
    assert_eq!(device.count(Command::Cancel), 1);
    assert!(!device.has_open_transfer());
    assert_eq!(device.file("/f"), None);
}

#[tokio::test]
async fn engine_cancel_stops_running_upload() {
    let device = Arc::new(SimulatedDevice::new());
    let engine = FileTransferEngine::new(Yielding(Arc::clone(&device)));
    // Ten chunks at the default frame length.
    let data = pattern(590);
    let opts = TransferOptions::default();

    let (upload, cancel) = tokio::join!(
        engine.upload_bytes("/f", &data, &opts),
        async {
            for _ in 0..6 {
                tokio::task::yield_now().await;
            }
            engine.cancel().await
        }
    );

    cancel.unwrap();
    assert!(matches!(upload, Err(TransferError::Cancelled)));

    let calls = device.calls();
    let cancel_at = calls
        .iter()
        .position(|c| c.command == Command::Cancel.code())
        .expect("cancel sent");
    assert!(calls[cancel_at + 1..].is_empty());
    assert_eq!(device.count(Command::Cancel), 1);
    assert!(device.count(Command::FileUpload) < 11);
    assert!(!device.has_open_transfer());
    assert_eq!(device.file("/f"), None);

    // The engine stays usable after a cancelled transfer.
    engine
        .upload_bytes("/g", &data, &TransferOptions::default())
        .await
        .unwrap();
    assert_eq!(device.file("/g"), Some(data));
}

#[tokio::test]
async fn download_budget_is_bounded_per_chunk() {
    let (device, engine) = engine_with(SimulatedDevice::new().with_file("/f", pattern(300)), 3);
    device.inject(
        FaultRule::new(Command::FileDownload, Fault::Error(TransportError::Timeout))
            .skip(2)
            .times(usize::MAX),
    );

    let err = engine
        .download_to_vec("/f", &TransferOptions::default())
        .await
        .unwrap_err();
    match err {
        TransferError::TooManyErrors { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last,
                TransferError::Transport(TransportError::Timeout)
            ));
        }
        other => panic!("expected TooManyErrors, got {other:?}"),
    }
    // Header, the first chunk, then three attempts at the second chunk.
    assert_eq!(device.count(Command::FileDownload), 5);
}

#[tokio::test]
async fn header_rejection_leaves_device_untouched() {
    let (device, engine) = engine_with(SimulatedDevice::new(), 4);

    let err = engine
        .upload_bytes("/missing/dir/f", &pattern(10), &TransferOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::FileOpenFailed));
    assert_eq!(device.count(Command::FileUpload), 1);
}

#[tokio::test]
async fn chunk_too_large_status_is_reported() {
    let (device, engine) = engine_with(SimulatedDevice::new().with_max_frame_length(200), 4);
    let opts = TransferOptions::default().with_chunk_length(150);
    let data = pattern(400);
    let summary = engine.upload_bytes("/ok", &data, &opts).await.unwrap();
    assert_eq!(summary.chunks, 3);

    device.inject(FaultRule::new(Command::FileUpload, Fault::Status(0x04)));
    let err = engine
        .upload_bytes("/big", &data, &opts)
        .await
        .unwrap_err();
    assert_eq!(err.remote_error(), Some(RemoteError::ChunkTooLarge));
    assert_eq!(device.file("/big"), None);
}
