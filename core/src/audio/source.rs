use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::orchestrator::OrchestratorConfig;
use crate::session::ConnectionState;

/// Gain applied to input RMS before it is added to the base level.
const AMPLITUDE_GAIN: f32 = 3.0;

/// 为音量估计器提供每个 tick 的目标值。
pub trait LevelSource: Send {
    fn target(&mut self, state: ConnectionState) -> f32;
}

#[derive(Debug, Clone, Copy)]
struct BaseLevels {
    speaking: f32,
    listening: f32,
    span: f32,
}

impl BaseLevels {
    fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            speaking: config.speaking_base,
            listening: config.listening_base,
            span: config.level_jitter.max(0.0),
        }
    }

    fn base(&self, state: ConnectionState) -> f32 {
        match state {
            ConnectionState::Speaking => self.speaking,
            ConnectionState::Listening => self.listening,
            _ => 0.0,
        }
    }
}

/// 用随机抖动模拟说话/聆听时的音量。
pub struct SyntheticLevelSource {
    levels: BaseLevels,
    rng: StdRng,
}

impl SyntheticLevelSource {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            levels: BaseLevels::from_config(config),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(config: &OrchestratorConfig, seed: u64) -> Self {
        Self {
            levels: BaseLevels::from_config(config),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl LevelSource for SyntheticLevelSource {
    fn target(&mut self, state: ConnectionState) -> f32 {
        if !state.is_audio_active() {
            return 0.0;
        }

        let noise = if self.levels.span > 0.0 {
            self.rng.gen_range(0.0..self.levels.span)
        } else {
            0.0
        };
        self.levels.base(state) + noise
    }
}

impl std::fmt::Debug for SyntheticLevelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticLevelSource")
            .field("levels", &self.levels)
            .finish_non_exhaustive()
    }
}

/// Latest input amplitude shared between the media feed and the estimator.
#[derive(Debug, Clone, Default)]
pub struct InputAmplitude {
    rms_bits: Arc<AtomicU32>,
}

impl InputAmplitude {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&self, frame: &[f32]) {
        self.store(frame_rms(frame));
    }

    /// 接收 16-bit 小端 PCM 帧。
    pub fn push_pcm_s16le(&self, pcm: Bytes) {
        let samples: Vec<f32> = pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / i16::MAX as f32)
            .collect();
        self.store(frame_rms(&samples));
    }

    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms_bits.load(Ordering::SeqCst))
    }

    fn store(&self, rms: f32) {
        let rms = if rms.is_finite() { rms.max(0.0) } else { 0.0 };
        self.rms_bits.store(rms.to_bits(), Ordering::SeqCst);
    }
}

/// 以真实输入音量驱动目标值。
#[derive(Debug)]
pub struct InputAmplitudeSource {
    levels: BaseLevels,
    amplitude: InputAmplitude,
}

impl InputAmplitudeSource {
    pub fn new(config: &OrchestratorConfig, amplitude: InputAmplitude) -> Self {
        Self {
            levels: BaseLevels::from_config(config),
            amplitude,
        }
    }
}

impl LevelSource for InputAmplitudeSource {
    fn target(&mut self, state: ConnectionState) -> f32 {
        if !state.is_audio_active() {
            return 0.0;
        }

        let boost = (self.amplitude.rms() * AMPLITUDE_GAIN).clamp(0.0, self.levels.span);
        self.levels.base(state) + boost
    }
}

pub(crate) fn frame_rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let energy: f32 = frame.iter().map(|sample| sample * sample).sum();
    (energy / frame.len() as f32).sqrt()
}
