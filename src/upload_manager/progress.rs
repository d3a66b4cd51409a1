use super::session::UploadState;
use serde::Serialize;
use std::sync::{
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc, Mutex, MutexGuard,
};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const PROGRESS_CHANNEL_CAP: usize = 64;
const SPEED_SAMPLE_MIN_INTERVAL: Duration = Duration::from_millis(300);

/// 推送给 UI 的会话进度事件。
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgressUpdate {
    pub session_id: String,
    pub state: UploadState,
    pub done_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: Option<f64>,
    pub timestamp_millis: i64,
}

/// 把传输层上报的“累计已发送字节数”换算成增量。
///
/// 基线只会前进不会后退：重复、乱序或被重置的累计值产生的增量为 0。
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressTracker {
    baseline: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, loaded: u64) -> u64 {
        let delta = loaded.saturating_sub(self.baseline);
        self.baseline = self.baseline.max(loaded);
        delta
    }

    pub fn baseline(&self) -> u64 {
        self.baseline
    }
}

/// 订阅者列表：满的通道丢弃本次事件，断开的通道直接移除。
#[derive(Clone, Default)]
pub(crate) struct ProgressBus {
    subscribers: Arc<Mutex<Vec<SyncSender<UploadProgressUpdate>>>>,
}

impl ProgressBus {
    pub(crate) fn subscribe(
        &self,
    ) -> (SyncSender<UploadProgressUpdate>, Receiver<UploadProgressUpdate>) {
        let (tx, rx) = mpsc::sync_channel(PROGRESS_CHANNEL_CAP);
        recover_lock(&self.subscribers).push(tx.clone());
        (tx, rx)
    }

    pub(crate) fn broadcast(&self, update: UploadProgressUpdate) {
        let mut subs = recover_lock(&self.subscribers);
        subs.retain_mut(|sender| match sender.try_send(update.clone()) {
            Ok(_) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

#[derive(Clone, Copy)]
struct ProgressTick {
    bytes: u64,
    instant: Instant,
}

/// 根据相邻两次采样计算速度，间隔过短时不出值，避免抖动。
#[derive(Default)]
pub(crate) struct SpeedMeter {
    last: Option<ProgressTick>,
}

impl SpeedMeter {
    pub(crate) fn sample(&mut self, bytes: u64) -> Option<f64> {
        self.sample_at(bytes, Instant::now())
    }

    fn sample_at(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        let last = *self.last.get_or_insert(ProgressTick {
            bytes,
            instant: now,
        });
        let delta_bytes = bytes.saturating_sub(last.bytes);
        let elapsed = now.saturating_duration_since(last.instant);
        if delta_bytes == 0 || elapsed < SPEED_SAMPLE_MIN_INTERVAL {
            return None;
        }
        self.last = Some(ProgressTick {
            bytes,
            instant: now,
        });
        Some(delta_bytes as f64 / elapsed.as_secs_f64())
    }
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

pub(crate) fn recover_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}
