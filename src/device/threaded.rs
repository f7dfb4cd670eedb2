use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use super::{ConnectState, DeviceBridge, PoseSource};
use crate::rig::SkeletonFrame;

/// 読み取り失敗後の待ち時間
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// 別スレッドでポーズストリームを読み、最新フレームを提供する
///
/// 制御系の問い合わせは内側の`DeviceBridge`にそのまま委譲する。
/// 読み取りスレッドは最新フレームを置くだけで、セッション状態には触れない。
pub struct ThreadedDevice<C> {
    control: C,
    latest: Arc<Mutex<Option<SkeletonFrame>>>,
    frame_id: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl<C: DeviceBridge> ThreadedDevice<C> {
    pub fn start<S: PoseSource + 'static>(control: C, mut source: S) -> Self {
        let latest = Arc::new(Mutex::new(None::<SkeletonFrame>));
        let latest_ref = latest.clone();
        let frame_id = Arc::new(AtomicU64::new(0));
        let frame_id_ref = frame_id.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_ref = stop.clone();

        let handle = thread::spawn(move || {
            info!("Pose stream thread started");
            while !stop_ref.load(Ordering::Acquire) {
                match source.next_frame() {
                    Ok(frame) => {
                        *latest_ref.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
                        frame_id_ref.fetch_add(1, Ordering::Release);
                    }
                    Err(e) => {
                        warn!("Pose stream read failed: {:#}", e);
                        thread::sleep(RETRY_DELAY);
                    }
                }
            }
            info!("Pose stream thread stopped");
        });

        Self {
            control,
            latest,
            frame_id,
            stop,
            handle: Some(handle),
        }
    }

    /// 現在のフレームID。新フレームが到着するたびにインクリメントされる。
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }
}

impl<C: DeviceBridge> DeviceBridge for ThreadedDevice<C> {
    fn set_tracking_mode(&mut self, mode: i32) {
        self.control.set_tracking_mode(mode);
    }

    fn start_calibration(&mut self) {
        self.control.start_calibration();
    }

    fn query_calibration_state(&mut self) -> bool {
        self.control.query_calibration_state()
    }

    fn query_connection_state(&mut self) -> ConnectState {
        self.control.query_connection_state()
    }

    fn recenter_origin(&mut self) {
        self.control.recenter_origin();
    }

    /// 最新フレームを取得。読み取りスレッドが次を書き込むまで同じフレームが返る。
    fn latest_frame(&mut self) -> Option<SkeletonFrame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<C> Drop for ThreadedDevice<C> {
    /// 停止フラグを立て、読み取り中の1フレームが終わるのを待つ
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Pose stream thread panicked");
            }
        }
    }
}
