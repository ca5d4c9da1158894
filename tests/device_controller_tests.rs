use anyhow::Result;
use async_trait::async_trait;
use biostream::config::ControllerConfig;
use biostream::core::{DeviceInfo, Frame};
use biostream::device::mock::mock_device;
use biostream::core::{FrameHeader, SampleRate};
use biostream::device::{
    AvatarDevice, Control, Device, DeviceController, DeviceError, DeviceRegistry, DeviceStatus,
    MockSettings,
};
use biostream::protocol::FrameEncoder;
use std::collections::VecDeque;
use std::io::{self, Read};
use biostream::storage::{FsRepository, Repository};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, timeout};

fn repository() -> (TempDir, Arc<dyn Repository>) {
    let dir = tempdir().unwrap();
    let repo = FsRepository::new(dir.path()).unwrap();
    (dir, Arc::new(repo))
}

fn controller(settings: MockSettings, capacity: usize) -> (TempDir, DeviceController) {
    let (dir, repo) = repository();
    let device = Arc::new(mock_device("mock-test", repo, settings));
    let config = ControllerConfig {
        subscriber_capacity: capacity,
        info_timeout_ms: 2_000,
    };
    (dir, DeviceController::new(device, config))
}

async fn wait_for_status(controller: &DeviceController, status: DeviceStatus) {
    timeout(Duration::from_secs(5), async {
        while controller.status() != status {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status not reached");
}

#[tokio::test]
async fn test_double_engage_fails_and_stays_engaged() {
    let (_dir, controller) = controller(MockSettings::default(), 1024);

    let info = controller.engage().await.unwrap();
    assert_eq!(info, DeviceInfo { channels: 8, sample_rate: 250 });
    assert_eq!(controller.status(), DeviceStatus::Engaged);

    let err = controller.engage().await.unwrap_err();
    assert!(matches!(err, DeviceError::AlreadyEngaged(_)));
    assert_eq!(controller.status(), DeviceStatus::Engaged);
    assert_eq!(controller.info(), Some(info));

    for _ in 0..4 {
        controller.disengage().await.unwrap();
        assert_eq!(controller.status(), DeviceStatus::Disengaged);
    }
    assert_eq!(controller.info(), None);

    // A fresh engagement after a full cycle.
    controller.engage().await.unwrap();
    controller.disengage().await.unwrap();
}

#[tokio::test]
async fn test_subscribe_name_collision() {
    let (_dir, controller) = controller(MockSettings::default(), 16);

    let _first = controller.subscribe("x").unwrap();
    assert!(matches!(
        controller.subscribe("x"),
        Err(DeviceError::SubscriberExists(name)) if name == "x"
    ));

    assert!(controller.unsubscribe("x"));
    assert!(!controller.unsubscribe("x"));
    let _second = controller.subscribe("x").unwrap();
    assert_eq!(controller.subscribers(), vec!["x".to_string()]);

    controller.unsubscribe_all();
    assert!(controller.subscribers().is_empty());
}

#[tokio::test]
async fn test_fan_out_shares_frames_in_order() {
    let settings = MockSettings {
        channels: 2,
        realtime: false,
        frame_limit: Some(6),
        ..MockSettings::default()
    };
    let (_dir, controller) = controller(settings, 1024);
    let a = controller.subscribe("a").unwrap();
    let b = controller.subscribe("b").unwrap();

    controller.engage().await.unwrap();

    // The byte source ends after six frames; the stream failure disengages
    // the device, which closes both subscriptions.
    let a = tokio::task::spawn_blocking(move || a.iter().collect::<Vec<_>>());
    let b = tokio::task::spawn_blocking(move || b.iter().collect::<Vec<_>>());
    let a = timeout(Duration::from_secs(5), a).await.unwrap().unwrap();
    let b = timeout(Duration::from_secs(5), b).await.unwrap().unwrap();

    assert_eq!(a.len(), 6);
    assert_eq!(b.len(), 6);
    for (i, (x, y)) in a.iter().zip(&b).enumerate() {
        assert!(Arc::ptr_eq(x, y), "frame {} was copied", i);
        assert_eq!(x.header.frame_counter, i as u32);
    }
    wait_for_status(&controller, DeviceStatus::Disengaged).await;
}

#[tokio::test]
async fn test_slow_subscriber_applies_backpressure() {
    let settings = MockSettings {
        channels: 1,
        realtime: false,
        ..MockSettings::default()
    };
    let (_dir, controller) = controller(settings, 2);
    let slow = controller.subscribe("slow").unwrap();

    controller.engage().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(slow.len(), 2);

    // Draining one lets exactly one more through, with nothing dropped.
    let first = slow.recv_timeout(Duration::from_secs(1)).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(slow.len(), 2);
    let second = slow.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(second.header.frame_counter, first.header.frame_counter + 1);

    // Disengage must not wait on the blocked publisher.
    timeout(Duration::from_secs(2), controller.disengage())
        .await
        .expect("disengage blocked by a full subscriber")
        .unwrap();
    assert_eq!(controller.status(), DeviceStatus::Disengaged);
    drop(slow);
}

#[tokio::test]
async fn test_unsubscribed_stream_ends_after_queue() {
    let settings = MockSettings {
        channels: 1,
        realtime: false,
        ..MockSettings::default()
    };
    let (_dir, controller) = controller(settings, 4);
    let sub = controller.subscribe("drain").unwrap();
    controller.engage().await.unwrap();

    sleep(Duration::from_millis(50)).await;
    controller.unsubscribe("drain");
    let drained = tokio::task::spawn_blocking(move || sub.iter().count());
    let count = timeout(Duration::from_secs(2), drained).await.unwrap().unwrap();
    // The queue of four, plus at most one frame from a publish that was
    // already delivering when the subscriber was removed.
    assert!((1..=5).contains(&count), "drained {}", count);

    controller.disengage().await.unwrap();
}

/// Device whose stream loop is scripted by the test.
struct ScriptedDevice {
    repository: Arc<dyn Repository>,
    script: fn(&mut Control) -> Result<()>,
    engaged: Mutex<u32>,
    disengaged: Mutex<u32>,
}

impl ScriptedDevice {
    fn new(repository: Arc<dyn Repository>, script: fn(&mut Control) -> Result<()>) -> Self {
        Self {
            repository,
            script,
            engaged: Mutex::new(0),
            disengaged: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn repository(&self) -> Arc<dyn Repository> {
        self.repository.clone()
    }

    async fn engage(&self) -> Result<()> {
        *self.engaged.lock().unwrap() += 1;
        Ok(())
    }

    async fn disengage(&self) -> Result<()> {
        *self.disengaged.lock().unwrap() += 1;
        Ok(())
    }

    fn stream(&self, mut control: Control) -> Result<()> {
        (self.script)(&mut control)
    }
}

fn scripted(
    script: fn(&mut Control) -> Result<()>,
    info_timeout_ms: u64,
) -> (TempDir, Arc<ScriptedDevice>, DeviceController) {
    let (dir, repo) = repository();
    let device = Arc::new(ScriptedDevice::new(repo, script));
    let config = ControllerConfig {
        subscriber_capacity: 8,
        info_timeout_ms,
    };
    let controller = DeviceController::new(device.clone(), config);
    (dir, device, controller)
}

fn idle_until_terminated(control: &Control) {
    while !control.should_terminate() {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[tokio::test]
async fn test_info_timeout_disengages() {
    let (_dir, device, controller) = scripted(
        |control| {
            idle_until_terminated(control);
            Ok(())
        },
        100,
    );

    let err = controller.engage().await.unwrap_err();
    assert!(matches!(err, DeviceError::InfoTimeout(_)));
    assert_eq!(controller.status(), DeviceStatus::Disengaged);
    assert_eq!(*device.engaged.lock().unwrap(), 1);
    assert_eq!(*device.disengaged.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_stream_error_before_info_fails_engage() {
    let (_dir, device, controller) =
        scripted(|_| Err(anyhow::anyhow!("port vanished")), 2_000);

    let err = controller.engage().await.unwrap_err();
    assert!(matches!(err, DeviceError::Stream(_)));
    assert!(err.to_string().contains("port vanished"));
    assert_eq!(controller.status(), DeviceStatus::Disengaged);

    // The worker's own disengage finds nothing left to tear down.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(*device.disengaged.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_stream_error_after_info_self_disengages() {
    let (_dir, device, controller) = scripted(
        |control| {
            control.send_info(DeviceInfo { channels: 1, sample_rate: 250 })?;
            std::thread::sleep(Duration::from_millis(50));
            anyhow::bail!("read failed")
        },
        2_000,
    );
    let sub = controller.subscribe("watcher").unwrap();

    controller.engage().await.unwrap();
    wait_for_status(&controller, DeviceStatus::Disengaged).await;
    assert_eq!(*device.disengaged.lock().unwrap(), 1);
    assert!(controller.subscribers().is_empty());
    assert!(sub.recv().is_none());
}

#[tokio::test]
async fn test_control_enforces_info_first() {
    static OUTCOMES: Mutex<Vec<String>> = Mutex::new(Vec::new());

    let (_dir, _device, controller) = scripted(
        |control| {
            let frame = |counter| Frame {
                header: biostream::core::FrameHeader {
                    sample_rate: biostream::core::SampleRate::Hz250,
                    version: 1,
                    frame_size: 0,
                    frame_type: 0,
                    frame_counter: counter,
                    channels: 1,
                    has_trigger: false,
                    samples: 0,
                    volt_range: 4500,
                    timestamp_seconds: 0,
                    timestamp_fraction: 0,
                },
                buffer: biostream::core::SampleBuffer::new(1, 0),
                received_at: std::time::SystemTime::now(),
            };
            let mut outcomes = OUTCOMES.lock().unwrap();
            outcomes.push(format!("{:?}", control.send(frame(0)).err()));
            control.send_info(DeviceInfo { channels: 1, sample_rate: 250 })?;
            outcomes.push(format!("{:?}", control.send_info(DeviceInfo { channels: 1, sample_rate: 250 }).err()));
            outcomes.push(format!("{:?}", control.send(frame(1)).err()));
            drop(outcomes);
            idle_until_terminated(control);
            Ok(())
        },
        2_000,
    );
    let sub = controller.subscribe("frames").unwrap();

    controller.engage().await.unwrap();
    let frame = timeout(
        Duration::from_secs(2),
        tokio::task::spawn_blocking(move || sub.recv()),
    )
    .await
    .unwrap()
    .unwrap()
    .unwrap();
    assert_eq!(frame.header.frame_counter, 1);
    controller.disengage().await.unwrap();

    let outcomes = OUTCOMES.lock().unwrap().clone();
    assert_eq!(
        outcomes,
        vec![
            "Some(InfoNotSent)".to_string(),
            "Some(InfoAlreadySent)".to_string(),
            "None".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_registry_builds_configured_kind() {
    let (_dir, repo) = repository();
    let registry = DeviceRegistry::with_defaults();
    assert!(registry.kinds().contains(&"mock".to_string()));

    let mut settings = biostream::config::DeviceSettings::default();
    let device = registry.create(&settings, repo.clone()).unwrap();
    assert_eq!(device.name(), "mock-0");

    settings.kind = "thinkgear".to_string();
    assert!(matches!(
        registry.create(&settings, repo),
        Err(DeviceError::UnknownKind(kind)) if kind == "thinkgear"
    ));
}

/// Serial link that delivers scripted reads and then stays silent, timing
/// out like an idle port.
struct QuietLink(VecDeque<io::Result<Vec<u8>>>);

impl Read for QuietLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.pop_front() {
            Some(Ok(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Some(Err(err)) => Err(err),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

fn wire_frame(counter: u32) -> Vec<u8> {
    let header = FrameHeader {
        sample_rate: SampleRate::Hz250,
        version: 1,
        frame_size: 0,
        frame_type: 0,
        frame_counter: counter,
        channels: 2,
        has_trigger: false,
        samples: 4,
        volt_range: 4500,
        timestamp_seconds: counter,
        timestamp_fraction: 0,
    };
    FrameEncoder::encode(&header, &[1, 2, 3, 4, 5, 6, 7, 8])
}

#[tokio::test]
async fn test_read_timeout_keeps_avatar_engaged() {
    let (_dir, repo) = repository();
    let device = AvatarDevice::with_connector(
        "avatar-test",
        repo,
        Box::new(|| -> io::Result<Box<dyn Read + Send>> {
            let script = vec![
                Ok(wire_frame(0)),
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
                Ok(wire_frame(1)),
            ];
            Ok(Box::new(QuietLink(script.into())))
        }),
    );
    let controller = DeviceController::new(Arc::new(device), ControllerConfig::default());
    let sub = controller.subscribe("frames").unwrap();

    let info = controller.engage().await.unwrap();
    assert_eq!(info, DeviceInfo { channels: 2, sample_rate: 250 });

    let frames = tokio::task::spawn_blocking(move || {
        let first = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = sub.recv_timeout(Duration::from_secs(2)).unwrap();
        (first, second)
    });
    let (first, second) = timeout(Duration::from_secs(5), frames).await.unwrap().unwrap();
    assert_eq!(first.header.frame_counter, 0);
    assert_eq!(second.header.frame_counter, 1);

    // Silence past the last frame is not a failure either.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.status(), DeviceStatus::Engaged);

    timeout(Duration::from_secs(2), controller.disengage())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(controller.status(), DeviceStatus::Disengaged);
}
