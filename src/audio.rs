use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::note;
use crate::room::Instrument;

/// Seconds a released voice takes to fade out.
const RELEASE_SECONDS: f32 = 0.12;

#[derive(Debug, Clone)]
struct Voice {
    velocity: f32,
    phase: f32,
    level: f32,
    releasing: bool,
    /// Key is up but the sustain pedal keeps it ringing
    sustained: bool,
}

/// Voices for every sounding pitch, shared with the audio callback.
#[derive(Debug)]
pub struct VoiceBank {
    voices: HashMap<u8, Voice>,
    sustain: bool,
    volume: f32,
}

impl VoiceBank {
    pub fn new(volume: f32) -> Self {
        Self {
            voices: HashMap::new(),
            sustain: false,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn key_down(&mut self, pitch: u8, velocity: f32) {
        let phase = self.voices.get(&pitch).map_or(0.0, |v| v.phase);
        self.voices.insert(
            pitch,
            Voice {
                velocity: velocity.clamp(0.0, 1.0),
                phase,
                level: 1.0,
                releasing: false,
                sustained: false,
            },
        );
    }

    pub fn key_up(&mut self, pitch: u8) {
        let sustain = self.sustain;
        if let Some(voice) = self.voices.get_mut(&pitch) {
            if sustain {
                voice.sustained = true;
            } else {
                voice.releasing = true;
            }
        }
    }

    pub fn set_sustain(&mut self, down: bool) {
        self.sustain = down;
        if !down {
            for voice in self.voices.values_mut().filter(|v| v.sustained) {
                voice.sustained = false;
                voice.releasing = true;
            }
        }
    }

    /// Voices that are still audible, fading ones included.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Fills an interleaved buffer with the mix of all voices.
    pub fn render(&mut self, data: &mut [f32], channels: usize, sample_rate: f32) {
        let channels = channels.max(1);
        let release_step = 1.0 / (RELEASE_SECONDS * sample_rate);

        for frame in data.chunks_mut(channels) {
            let mut sample_value: f32 = 0.0;

            for (&pitch, voice) in self.voices.iter_mut() {
                let phase_increment = note::frequency(pitch) / sample_rate;
                voice.phase = (voice.phase + phase_increment) % 1.0;

                // Sine, square, saw and triangle blend
                let square_wave = if voice.phase < 0.5 { 1.0 } else { -1.0 };
                let sine_wave = (2.0 * std::f32::consts::PI * voice.phase).sin();
                let sawtooth_wave = 2.0 * voice.phase - 1.0;
                let triangle_wave = (2.0 * voice.phase - 1.0).abs() * 2.0 - 1.0;
                let mixed_wave = 0.3 * sine_wave + 0.3 * square_wave + 0.2 * sawtooth_wave + 0.2 * triangle_wave;

                sample_value += mixed_wave * voice.velocity * voice.level;

                if voice.releasing {
                    voice.level = (voice.level - release_step).max(0.0);
                }
            }

            self.voices.retain(|_, voice| voice.level > 0.0);
            sample_value = (sample_value * self.volume).clamp(-1.0, 1.0); // Prevent clipping

            for sample in frame.iter_mut() {
                *sample = sample_value;
            }
        }
    }
}

/// The room's instrument, backed by a shared [`VoiceBank`].
#[derive(Debug, Clone)]
pub struct Synth {
    voices: Arc<Mutex<VoiceBank>>,
}

impl Synth {
    pub fn new(voices: Arc<Mutex<VoiceBank>>) -> Self {
        Self { voices }
    }

    fn with_voices(&self, f: impl FnOnce(&mut VoiceBank)) {
        f(&mut self.voices.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl Instrument for Synth {
    fn key_down(&mut self, pitch: u8, velocity: f32) {
        self.with_voices(|v| v.key_down(pitch, velocity));
    }

    fn key_up(&mut self, pitch: u8) {
        self.with_voices(|v| v.key_up(pitch));
    }

    fn sustain(&mut self, down: bool) {
        self.with_voices(|v| v.set_sustain(down));
    }
}

#[cfg(feature = "audio")]
pub use output::run_audio_synthesizer;

#[cfg(feature = "audio")]
mod output {
    use std::sync::{Arc, PoisonError};

    use cpal::{
        traits::{DeviceTrait, HostTrait, StreamTrait},
        StreamConfig,
    };
    use tracing::{error, info};

    use crate::state::AppState;

    /// Starts the audio synthesizer task
    pub async fn run_audio_synthesizer(state: Arc<AppState>) {
        let result = tokio::task::spawn_blocking(move || {
            // Initialize the audio host and device
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(device) => {
                    info!("Default output device found: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));
                    device
                }
                None => {
                    error!("No output device found");
                    return;
                }
            };

            let supported_config = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    error!("Failed to get default output config: {}", e);
                    return;
                }
            };

            let config = StreamConfig {
                channels: supported_config.channels(),
                sample_rate: supported_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };

            info!("Audio stream configuration: {:?}", config);

            let voices = state.voices.clone();
            let channels = config.channels as usize;
            let sample_rate = config.sample_rate.0 as f32;
            let stream = match device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    voices
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .render(data, channels, sample_rate);
                },
                |err| {
                    error!("An error occurred on the audio stream: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to build audio stream: {}", e);
                    return;
                }
            };

            info!("Starting audio stream...");
            if let Err(e) = stream.play() {
                error!("Failed to play audio stream: {}", e);
                return;
            }

            // Keep the stream alive until shutdown
            while !state.is_shutting_down() {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
        })
        .await;

        if let Err(e) = result {
            error!("Audio synthesizer task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f32 = 1_000.0;

    fn peak(bank: &mut VoiceBank, frames: usize) -> f32 {
        let mut buffer = vec![0.0; frames * 2];
        bank.render(&mut buffer, 2, RATE);
        buffer.iter().fold(0.0, |acc: f32, s| acc.max(s.abs()))
    }

    #[test]
    fn silent_without_voices() {
        let mut bank = VoiceBank::new(0.5);
        assert_eq!(peak(&mut bank, 64), 0.0);
    }

    #[test]
    fn released_voice_fades_out() {
        let mut bank = VoiceBank::new(1.0);
        bank.key_down(69, 1.0);
        assert!(peak(&mut bank, 64) > 0.0);
        bank.key_up(69);
        assert_eq!(bank.voice_count(), 1);
        // 0.12 s at 1 kHz
        peak(&mut bank, 130);
        assert_eq!(bank.voice_count(), 0);
    }

    #[test]
    fn pedal_holds_released_keys() {
        let mut bank = VoiceBank::new(1.0);
        bank.set_sustain(true);
        bank.key_down(60, 0.8);
        bank.key_up(60);
        peak(&mut bank, 500);
        assert_eq!(bank.voice_count(), 1);

        bank.set_sustain(false);
        peak(&mut bank, 500);
        assert_eq!(bank.voice_count(), 0);
    }

    #[test]
    fn output_is_clamped_and_scaled() {
        let mut bank = VoiceBank::new(1.0);
        for pitch in 40..80 {
            bank.key_down(pitch, 1.0);
        }
        assert!(peak(&mut bank, 256) <= 1.0);

        let mut quiet = VoiceBank::new(0.0);
        quiet.key_down(60, 1.0);
        assert_eq!(peak(&mut quiet, 64), 0.0);
    }

    #[test]
    fn synth_drives_the_shared_bank() {
        let voices = Arc::new(Mutex::new(VoiceBank::new(0.5)));
        let mut synth = Synth::new(voices.clone());
        synth.key_down(60, 0.5);
        synth.key_down(64, 0.5);
        synth.key_up(60);
        assert_eq!(voices.lock().unwrap().voice_count(), 2);
        synth.sustain(true);
        assert!(voices.lock().unwrap().sustain);
    }
}
