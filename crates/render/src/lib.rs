use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use daw_transport::{AudioArc, AudioBuffer, ClipId, SoundAsset};

pub const EXPORT_SAMPLE_RATE: u32 = 44_100;
pub const EXPORT_CHANNELS: u16 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("nothing to export: place at least one sound on the timeline")]
    NothingToExport,

    #[error("could not allocate a mix buffer of {frames} frames")]
    Allocation { frames: usize },

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One clip as the mixdown sees it: already converted from position units
/// to seconds by the arrangement's time mode.
#[derive(Debug, Clone)]
pub struct RenderClip {
    pub clip_id: ClipId,
    pub asset: Arc<SoundAsset>,
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl RenderClip {
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> f64 {
    seconds * sample_rate as f64
}

/// Latest clip end in seconds; 0.0 when there is nothing audible.
pub fn mix_length_secs(clips: &[RenderClip]) -> f64 {
    clips
        .iter()
        .map(RenderClip::end_secs)
        .filter(|end| end.is_finite())
        .fold(0.0, f64::max)
}

/// Sum every clip into one stereo buffer.
///
/// Overlapping clips add; nothing is normalized, so the result may exceed
/// full scale until [`encode_wav`] clamps it. A clip whose audio cannot be
/// decoded or resampled is skipped and the rest of the mix still renders.
pub fn render_mixdown<F>(
    clips: &[RenderClip],
    sample_rate: u32,
    mut decode: F,
) -> Result<AudioBuffer, RenderError>
where
    F: FnMut(&SoundAsset) -> anyhow::Result<AudioArc>,
{
    let length_secs = mix_length_secs(clips);
    if length_secs <= 0.0 {
        return Err(RenderError::NothingToExport);
    }

    let total_frames = seconds_to_samples(length_secs, sample_rate).ceil() as usize;
    let output_channels = EXPORT_CHANNELS as usize;
    let total_samples = total_frames
        .checked_mul(output_channels)
        .ok_or(RenderError::Allocation {
            frames: total_frames,
        })?;

    let mut samples: Vec<f32> = Vec::new();
    samples
        .try_reserve_exact(total_samples)
        .map_err(|_| RenderError::Allocation {
            frames: total_frames,
        })?;
    samples.resize(total_samples, 0.0);

    for clip in clips {
        if !clip.start_secs.is_finite() {
            log::warn!("skipping clip {:?}: start is not finite", clip.clip_id);
            continue;
        }

        let audio = match decode(&clip.asset).and_then(|audio| audio.resample(sample_rate)) {
            Ok(audio) => audio,
            Err(e) => {
                log::warn!("skipping clip {:?} ('{}'): {e}", clip.clip_id, clip.asset.name);
                continue;
            }
        };

        let start_frame = seconds_to_samples(clip.start_secs, sample_rate)
            .round()
            .max(0.0) as usize;
        if start_frame >= total_frames {
            continue;
        }

        let source_channels = audio.channels() as usize;
        let source = audio.samples();
        let frames = audio.frames().min(total_frames - start_frame);

        for frame in 0..frames {
            let dst = (start_frame + frame) * output_channels;
            for ch in 0..output_channels {
                // Mono sources feed both outputs at full level.
                let source_ch = if source_channels == 1 { 0 } else { ch };
                if source_ch < source_channels {
                    samples[dst + ch] += source[frame * source_channels + source_ch];
                }
            }
        }
    }

    Ok(AudioBuffer {
        samples,
        sample_rate,
        channels: EXPORT_CHANNELS,
    })
}

/// Encode as canonical 16-bit PCM WAV.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>, RenderError> {
    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in &buffer.samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode and write `buffer` to `path`.
///
/// The file only appears once it is complete: bytes go to a sibling
/// temporary file that is renamed into place.
pub fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<(), RenderError> {
    let bytes = encode_wav(buffer)?;
    write_atomic(path, &bytes)?;
    log::info!(
        "exported {:.2}s of audio to {}",
        buffer.duration_secs(),
        path.display()
    );
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let partial = partial_path(path);
    let result = std::fs::File::create(&partial)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&partial, path));

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export.wav".to_string());
    path.with_file_name(format!(".{name}.part"))
}
