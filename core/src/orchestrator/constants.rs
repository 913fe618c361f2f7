use std::time::Duration;

pub(crate) const LEVEL_TICK: Duration = Duration::from_millis(100);
pub(crate) const DURATION_TICK: Duration = Duration::from_millis(1_000);
pub(crate) const LEVEL_SMOOTHING: f32 = 0.3;
pub(crate) const SPEAKING_BASE_LEVEL: f32 = 0.5;
pub(crate) const LISTENING_BASE_LEVEL: f32 = 0.2;
pub(crate) const LEVEL_JITTER: f32 = 0.3;
pub(crate) const LIFECYCLE_CAPACITY: usize = 32;
pub(crate) const PROVISION_TIMEOUT: Duration = Duration::from_millis(10_000);
