use crate::error::{DeviceError, DeviceErrorKind, DeviceResult};
use crate::geometry::DiskGeometry;
use crate::request::{CompletionSignal, Direction, IoOutcome, IoRequest, IoSegment};
use crate::store::BackingStore;
use crate::target::BlockTarget;
use crate::SECTOR_SHIFT;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

/// Lifecycle state of a [`VirtualDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// Initial state; all I/O rejected.
    Unbound,
    /// Bound to a backing resource; I/O accepted.
    Active,
    /// Draining; no new I/O admitted, existing requests run to completion.
    Deleting,
}

const STATE_UNBOUND: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_DELETING: u8 = 2;

/// Backing resources held for the lifetime of one bind.
struct Attachment {
    capacity_sectors: u64,
    store: Arc<BackingStore>,
    target: Option<Arc<dyn BlockTarget>>,
}

/// A virtual block device routing a live stream of I/O requests either to an
/// in-memory backing store or, when an underlying device is bound, through to
/// that device.
///
/// The lifecycle is explicit: construct, [`bind`](Self::bind) (or
/// [`bind_ram`](Self::bind_ram)), serve requests via
/// [`handle`](Self::handle), then [`teardown`](Self::teardown), which drains
/// in-flight requests before releasing the backing resources. After teardown
/// the same instance can be bound again.
pub struct VirtualDevice {
    state: AtomicU8,
    inflight: AtomicU64,
    /// Signaled whenever the in-flight count hits zero.
    drained: Notify,
    /// Present iff state is Active or Deleting. Read on the hot path only to
    /// clone handles; written only with the control lock held.
    attachment: RwLock<Option<Attachment>>,
    /// Serializes bind/teardown; never touched by the data path.
    ctl: Mutex<()>,
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_UNBOUND),
            inflight: AtomicU64::new(0),
            drained: Notify::new(),
            attachment: RwLock::new(None),
            ctl: Mutex::new(()),
        }
    }

    pub fn state(&self) -> DeviceState {
        match self.state.load(Ordering::SeqCst) {
            STATE_ACTIVE => DeviceState::Active,
            STATE_DELETING => DeviceState::Deleting,
            _ => DeviceState::Unbound,
        }
    }

    /// Capacity in sectors; 0 until bound.
    pub fn capacity_sectors(&self) -> u64 {
        self.attachment
            .read()
            .expect("attachment lock poisoned")
            .as_ref()
            .map(|att| att.capacity_sectors)
            .unwrap_or(0)
    }

    /// Requests admitted but not yet completed.
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Read-only geometry projection; `None` while unbound.
    pub fn geometry(&self) -> Option<DiskGeometry> {
        let capacity = self.capacity_sectors();
        (capacity > 0).then(|| DiskGeometry::from_capacity(capacity))
    }

    /// Bind the device to an already-opened underlying target.
    ///
    /// Reads the target's capacity, allocates a backing store of the same
    /// size and activates the device in pass-through mode. On any failure
    /// the target handle is dropped before returning and the device stays
    /// unbound.
    pub async fn bind(&self, target: Box<dyn BlockTarget>) -> DeviceResult<u64> {
        let _ctl = self.ctl.lock().await;
        if self.state.load(Ordering::SeqCst) != STATE_UNBOUND {
            return Err(DeviceError::new(DeviceErrorKind::AlreadyBound));
        }
        let capacity = target.total_sectors().await.map_err(|err| {
            DeviceError::with_message(DeviceErrorKind::DeviceOpenFailed, err.to_string())
        })?;
        if capacity == 0 {
            return Err(DeviceError::with_message(
                DeviceErrorKind::DeviceOpenFailed,
                "underlying device reports zero capacity",
            ));
        }
        let store = BackingStore::allocate(capacity)?;
        debug!(capacity, "bound underlying device");
        self.install(Attachment {
            capacity_sectors: capacity,
            store: Arc::new(store),
            target: Some(Arc::from(target)),
        });
        Ok(capacity)
    }

    /// Activate the device in local-emulation mode: all I/O is served from
    /// an in-memory backing store of `capacity_sectors` sectors.
    pub async fn bind_ram(&self, capacity_sectors: u64) -> DeviceResult<u64> {
        let _ctl = self.ctl.lock().await;
        if self.state.load(Ordering::SeqCst) != STATE_UNBOUND {
            return Err(DeviceError::new(DeviceErrorKind::AlreadyBound));
        }
        if capacity_sectors == 0 {
            return Err(DeviceError::with_message(
                DeviceErrorKind::InvalidRequest,
                "capacity must be non-zero",
            ));
        }
        let store = BackingStore::allocate(capacity_sectors)?;
        debug!(capacity = capacity_sectors, "bound in-memory backing store");
        self.install(Attachment {
            capacity_sectors,
            store: Arc::new(store),
            target: None,
        });
        Ok(capacity_sectors)
    }

    fn install(&self, attachment: Attachment) {
        *self
            .attachment
            .write()
            .expect("attachment lock poisoned") = Some(attachment);
        self.state.store(STATE_ACTIVE, Ordering::SeqCst);
    }

    /// Stop admitting new requests. Idempotent; the sole signal the request
    /// router checks.
    pub fn begin_teardown(&self) {
        self.state.store(STATE_DELETING, Ordering::SeqCst);
    }

    /// Drain and release the device.
    ///
    /// Blocks the calling task until every admitted request has completed,
    /// then flushes and releases the underlying target and frees the backing
    /// store. The device returns to its pre-bind state and may be bound
    /// again. Releasing before the drain finishes would be a use-after-free
    /// hazard, so the ordering here is fixed: stop admissions, drain,
    /// release.
    pub async fn teardown(&self) {
        let _ctl = self.ctl.lock().await;
        self.begin_teardown();
        debug!("draining in-flight requests");
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inflight.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        let attachment = self
            .attachment
            .write()
            .expect("attachment lock poisoned")
            .take();
        if let Some(attachment) = attachment {
            if let Some(target) = &attachment.target {
                if let Err(err) = target.flush().await {
                    warn!(%err, "flush on teardown failed");
                }
            }
            debug!(
                capacity = attachment.capacity_sectors,
                "released backing store and binding"
            );
        }
        self.state.store(STATE_UNBOUND, Ordering::SeqCst);
    }

    /// Route one I/O request. Returns promptly; the outcome reaches the
    /// request's completion signal once the transfer has finished.
    ///
    /// Must be called from within a Tokio runtime: forwarded and local
    /// transfers complete on a spawned task.
    pub fn handle(self: &Arc<Self>, request: IoRequest) {
        let IoRequest {
            direction,
            start_sector,
            segments,
            completion,
        } = match request.validate() {
            Ok(()) => request,
            Err(err) => {
                complete(request.completion, Err(err));
                return;
            }
        };

        trace!(
            ?direction,
            start_sector,
            segments = segments.len(),
            "incoming request"
        );

        // Admission: increment first, then check the state. Teardown flips
        // the state before it samples the counter, so an admission that saw
        // Active is always covered by the drain, and one that saw Deleting
        // backs out below.
        self.inflight.fetch_add(1, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != STATE_ACTIVE {
            self.retire();
            complete(
                completion,
                Err(DeviceError::new(DeviceErrorKind::DeviceUnavailable)),
            );
            return;
        }

        let (capacity, store, target) = {
            let slot = self.attachment.read().expect("attachment lock poisoned");
            match slot.as_ref() {
                Some(att) => (
                    att.capacity_sectors,
                    Arc::clone(&att.store),
                    att.target.clone(),
                ),
                None => {
                    drop(slot);
                    self.retire();
                    complete(
                        completion,
                        Err(DeviceError::new(DeviceErrorKind::DeviceUnavailable)),
                    );
                    return;
                }
            }
        };

        let device = Arc::clone(self);
        tokio::spawn(async move {
            let result = dispatch(capacity, store, target, direction, start_sector, segments).await;
            if let Err(err) = &result {
                debug!(%err, "request failed");
            }
            complete(completion, result);
            device.retire();
        });
    }

    /// Pair of every admission's increment. Exactly one call per admitted
    /// request, on every exit path.
    fn retire(&self) {
        let prev = self.inflight.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "in-flight count underflow");
        if prev == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn complete(signal: CompletionSignal, result: DeviceResult<IoOutcome>) {
    // The submitter may have dropped its waiter; the request still counts as
    // completed.
    let _ = signal.send(result);
}

/// Service the request segment by segment, advancing the sector cursor by
/// the sectors actually transferred. A clipped segment short-completes the
/// whole request. Pass-through wins whenever a target is present.
async fn dispatch(
    capacity: u64,
    store: Arc<BackingStore>,
    target: Option<Arc<dyn BlockTarget>>,
    direction: Direction,
    start_sector: u64,
    mut segments: Vec<IoSegment>,
) -> DeviceResult<IoOutcome> {
    let mut pos = start_sector;
    let mut total = 0u64;
    for segment in &mut segments {
        let requested = segment.sectors();
        let moved = match &target {
            Some(target) => {
                forward_segment(target.as_ref(), capacity, segment, pos, direction).await?
            }
            None => store.transfer(segment, pos, direction),
        };
        pos += moved;
        total += moved;
        if moved < requested {
            break;
        }
    }
    Ok(IoOutcome {
        sectors_transferred: total,
        segments,
    })
}

/// Forward one segment to the underlying target, clipped against the bound
/// capacity the same way the backing store clips.
async fn forward_segment(
    target: &dyn BlockTarget,
    capacity: u64,
    segment: &mut IoSegment,
    pos: u64,
    direction: Direction,
) -> DeviceResult<u64> {
    let mut len = segment.sectors();
    if pos >= capacity {
        return Ok(0);
    }
    if pos + len > capacity {
        len = capacity - pos;
    }
    let nbytes = (len as usize) << SECTOR_SHIFT;
    let result = match direction {
        Direction::Read => target.read_sectors(pos, &mut segment.buf[..nbytes]).await,
        Direction::Write => target.write_sectors(pos, &segment.buf[..nbytes]).await,
    };
    result.map_err(|err| {
        DeviceError::with_message(DeviceErrorKind::ForwardFailed, err.to_string())
    })?;
    Ok(len)
}
