use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{Control, Device, DeviceError, DeviceStatus};
use crate::config::ControllerConfig;
use crate::core::{DeviceInfo, Frame};

/// Lifecycle flag and subscriber registry, guarded together.
struct Registry {
    status: DeviceStatus,
    info: Option<DeviceInfo>,
    subscribers: HashMap<String, Sender<Arc<Frame>>>,
    /// Bumped on every engage so a late worker failure can only tear down
    /// the engagement that spawned it.
    generation: u64,
    terminate: Option<Arc<AtomicBool>>,
}

impl Registry {
    fn transition(&mut self, target: DeviceStatus) {
        debug_assert!(
            self.status.can_transition_to(target),
            "invalid device transition {} -> {}",
            self.status.name(),
            target.name()
        );
        self.status = target;
    }
}

struct Shared {
    device: Arc<dyn Device>,
    subscriber_capacity: usize,
    info_timeout: Duration,
    /// Exclusive device access across engage and disengage.
    access: tokio::sync::Mutex<()>,
    registry: Mutex<Registry>,
}

/// Owns a device's lifecycle and fans its frames out to subscribers.
///
/// Cheap to clone; clones share the same device and registry.
#[derive(Clone)]
pub struct DeviceController {
    shared: Arc<Shared>,
}

type StreamExit = anyhow::Result<()>;

impl DeviceController {
    pub fn new(device: Arc<dyn Device>, config: ControllerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                subscriber_capacity: config.subscriber_capacity.max(1),
                info_timeout: config.info_timeout(),
                access: tokio::sync::Mutex::new(()),
                registry: Mutex::new(Registry {
                    status: DeviceStatus::Disengaged,
                    info: None,
                    subscribers: HashMap::new(),
                    generation: 0,
                    terminate: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.shared.device.name()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.shared.device
    }

    pub fn status(&self) -> DeviceStatus {
        self.registry().status
    }

    /// Stream parameters of the current engagement.
    pub fn info(&self) -> Option<DeviceInfo> {
        self.registry().info
    }

    /// Connect the device and start its stream loop.
    ///
    /// Returns once the stream loop has reported [`DeviceInfo`]. Fails
    /// without touching the current engagement if the device is not
    /// disengaged.
    pub async fn engage(&self) -> Result<DeviceInfo, DeviceError> {
        let _access = self.shared.access.lock().await;
        let generation = {
            let mut registry = self.registry();
            if registry.status != DeviceStatus::Disengaged {
                return Err(DeviceError::AlreadyEngaged(self.name().to_string()));
            }
            registry.transition(DeviceStatus::Engaging);
            registry.generation += 1;
            registry.generation
        };

        info!(device = %self.name(), "engaging device");
        if let Err(err) = self.shared.device.engage().await {
            self.registry().transition(DeviceStatus::Disengaged);
            return Err(DeviceError::Driver(err));
        }

        let terminate = Arc::new(AtomicBool::new(false));
        let (info_tx, info_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.registry().terminate = Some(terminate.clone());
        let control = Control::new(info_tx, self.clone(), terminate);
        self.spawn_worker(generation, control, exit_tx);

        let failure = match timeout(self.shared.info_timeout, info_rx).await {
            Ok(Ok(info)) => {
                let mut registry = self.registry();
                registry.info = Some(info);
                registry.transition(DeviceStatus::Engaged);
                info!(
                    device = %self.name(),
                    channels = info.channels,
                    sample_rate = info.sample_rate,
                    "device engaged"
                );
                return Ok(info);
            }
            // Control dropped without reporting: the stream loop has exited.
            Ok(Err(_)) => match exit_rx.await {
                Ok(Err(err)) => DeviceError::Stream(err),
                _ => DeviceError::NoDeviceInfo,
            },
            Err(_) => DeviceError::InfoTimeout(self.shared.info_timeout),
        };

        warn!(device = %self.name(), error = %failure, "engage failed");
        if let Err(err) = self.teardown().await {
            warn!(device = %self.name(), error = %err, "teardown after failed engage");
        }
        Err(failure)
    }

    /// Stop the stream loop, close every subscription and disconnect the
    /// device. No-op when already disengaged.
    pub async fn disengage(&self) -> Result<(), DeviceError> {
        let _access = self.shared.access.lock().await;
        if self.status() == DeviceStatus::Disengaged {
            return Ok(());
        }
        self.teardown().await
    }

    /// Register a bounded stream of frames under `name`.
    pub fn subscribe(&self, name: &str) -> Result<Subscription, DeviceError> {
        let mut registry = self.registry();
        if registry.subscribers.contains_key(name) {
            return Err(DeviceError::SubscriberExists(name.to_string()));
        }
        let (tx, rx) = bounded(self.shared.subscriber_capacity);
        registry.subscribers.insert(name.to_string(), tx);
        debug!(device = %self.name(), subscriber = name, "subscribed");
        Ok(Subscription {
            name: name.to_string(),
            receiver: rx,
        })
    }

    /// Close the stream registered under `name`. Returns whether it existed.
    ///
    /// Frames already queued stay readable. A publish that snapshotted the
    /// subscriber list before this call may still deliver one more frame,
    /// after which the stream ends.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let removed = self.registry().subscribers.remove(name).is_some();
        if removed {
            debug!(device = %self.name(), subscriber = name, "unsubscribed");
        }
        removed
    }

    /// Close every subscriber stream and clear the registry.
    pub fn unsubscribe_all(&self) {
        let mut registry = self.registry();
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        if count > 0 {
            debug!(device = %self.name(), count, "unsubscribed all");
        }
    }

    pub fn subscribers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().subscribers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Deliver `frame` to every current subscriber, blocking while a
    /// subscriber's stream is full. Returns the number of subscribers that
    /// received it.
    ///
    /// Subscribers are those registered when the call starts; one removed
    /// during delivery can still receive this frame.
    pub fn publish(&self, frame: Arc<Frame>) -> usize {
        // Snapshot under the lock, deliver outside it: a full subscriber
        // must not block unsubscribe.
        let targets: Vec<(String, Sender<Arc<Frame>>)> = self
            .registry()
            .subscribers
            .iter()
            .map(|(name, tx)| (name.clone(), tx.clone()))
            .collect();

        let mut delivered = 0;
        for (name, tx) in targets {
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(device = %self.name(), subscriber = %name, "subscriber gone");
                let mut registry = self.registry();
                if registry
                    .subscribers
                    .get(&name)
                    .is_some_and(|current| current.same_channel(&tx))
                {
                    registry.subscribers.remove(&name);
                }
            }
        }
        delivered
    }

    fn spawn_worker(
        &self,
        generation: u64,
        control: Control,
        exit_tx: oneshot::Sender<StreamExit>,
    ) {
        let controller = self.clone();
        let device = self.shared.device.clone();
        tokio::spawn(async move {
            let name = device.name().to_string();
            let result = match tokio::task::spawn_blocking(move || device.stream(control)).await
            {
                Ok(result) => result,
                Err(join) => Err(anyhow::anyhow!("stream loop panicked: {}", join)),
            };

            match result {
                Ok(()) => {
                    debug!(device = %name, "stream loop exited");
                    let _ = exit_tx.send(Ok(()));
                }
                Err(err) => {
                    error!(device = %name, error = %format!("{:#}", err), "stream loop failed");
                    let _ = exit_tx.send(Err(err));
                    controller.disengage_generation(generation).await;
                }
            }
        });
    }

    async fn disengage_generation(&self, generation: u64) {
        let _access = self.shared.access.lock().await;
        {
            let registry = self.registry();
            if registry.generation != generation || registry.status == DeviceStatus::Disengaged {
                return;
            }
        }
        info!(device = %self.name(), "disengaging after stream failure");
        if let Err(err) = self.teardown().await {
            warn!(device = %self.name(), error = %err, "disengage after stream failure");
        }
    }

    /// Caller holds `access`.
    async fn teardown(&self) -> Result<(), DeviceError> {
        {
            let mut registry = self.registry();
            registry.transition(DeviceStatus::Disengaging);
            if let Some(terminate) = registry.terminate.take() {
                terminate.store(true, Ordering::Release);
            }
        }
        self.unsubscribe_all();

        let result = self.shared.device.disengage().await;

        let mut registry = self.registry();
        registry.info = None;
        registry.transition(DeviceStatus::Disengaged);
        drop(registry);

        match result {
            Ok(()) => {
                info!(device = %self.name(), "device disengaged");
                Ok(())
            }
            Err(err) => Err(DeviceError::Driver(err)),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded stream of frames for one subscriber. Ends once the subscriber
/// is unsubscribed and every queued frame has been received.
pub struct Subscription {
    name: String,
    receiver: Receiver<Arc<Frame>>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the next frame; `None` once the stream is closed.
    pub fn recv(&self) -> Option<Arc<Frame>> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<Frame>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Arc<Frame>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<Frame>> + '_ {
        self.receiver.iter()
    }
}
