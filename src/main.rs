use anyhow::Result;
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

use talava_legstep::config::Config;
use talava_legstep::device::{GaitSource, SimDevice, SimProfileService, ThreadedDevice};
use talava_legstep::effect::{IdleMinigame, LogEffects};
use talava_legstep::prefs::MemoryPreferences;
use talava_legstep::rig::Skeleton;
use talava_legstep::session::{Collaborators, Session};
use talava_legstep::ui::LogPanels;

const CONFIG_PATH: &str = "config.toml";
const AVATAR_NAME: &str = "reference";
const ROOT_HEIGHT: f32 = 0.95;
const STEP_PERIOD_MS: u64 = 700;
const PROFILE_STATURE_CM: f32 = 172.0;
const PROFILE_DELAY_MS: u64 = 300;
/// キャリブレーションアプリから戻るまでの時間
const CALIBRATION_DELAY_SECS: u64 = 2;

fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Leg step session {}", env!("GIT_VERSION"));
    info!("Target FPS: {}", config.app.target_fps);
    info!(
        "Expected units: {}, profile timeout: {}ms",
        config.session.expected_units, config.session.profile_timeout_ms
    );

    let sim = SimDevice::new();
    let band = sim.handle();
    band.set_connected(config.session.expected_units);
    let gait = GaitSource::new(
        ROOT_HEIGHT,
        Duration::from_millis(STEP_PERIOD_MS),
        config.app.target_fps,
    );
    let device = ThreadedDevice::start(sim, gait);

    let mut session = Session::new(
        &config,
        Skeleton::reference(AVATAR_NAME),
        Collaborators {
            device: Box::new(device),
            preferences: Box::new(MemoryPreferences::new(config.preferences.clone())),
            profile: Some(Box::new(SimProfileService::new(
                Some(PROFILE_STATURE_CM),
                Duration::from_millis(PROFILE_DELAY_MS),
            ))),
            minigame: Box::new(IdleMinigame),
            effects: Box::new(LogEffects),
            panels: Box::new(LogPanels),
        },
    );

    // 未キャリブレーションで起動 → キャリブレーション開始
    session.on_resume();
    session.start_calibration()?;
    let mut calibration_deadline = Some(Instant::now() + Duration::from_secs(CALIBRATION_DELAY_SECS));

    let frame_duration = Duration::from_secs_f64(1.0 / config.app.target_fps.max(1) as f64);

    // FPS計測
    let mut frame_count = 0u32;
    let mut step_count = 0u32;
    let mut fps_timer = Instant::now();

    loop {
        let loop_start = Instant::now();

        if let Some(deadline) = calibration_deadline {
            if deadline.saturating_duration_since(Instant::now()).is_zero() {
                band.set_calibrated(true);
                session.on_focus_gained();
                calibration_deadline = None;
            }
        }

        for event in session.tick() {
            step_count += 1;
            info!(
                "Step: foot = {:?}, action = {:?}, position = [{:.3}, {:.3}, {:.3}]",
                event.foot, event.action, event.position[0], event.position[1], event.position[2]
            );
        }

        frame_count += 1;
        let elapsed = fps_timer.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            info!(
                "FPS: {:.1} | state = {:?} | steps = {}",
                frame_count as f32 / elapsed,
                session.state(),
                step_count
            );
            frame_count = 0;
            step_count = 0;
            fps_timer = Instant::now();
        }

        let remaining = frame_duration.saturating_sub(loop_start.elapsed());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}
