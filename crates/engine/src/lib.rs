use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use daw_transport::{AudioArc, VoiceId, VoiceSink, resample_audio_arc};

/// Voices the audio thread can mix at once. The voice list is allocated up
/// front so the callback never grows it.
pub const MAX_VOICES: usize = 64;

const COMMAND_CAPACITY: usize = 256;

enum Command {
    StartVoice {
        voice: VoiceId,
        audio: Shared<AudioArc>,
        offset_frames: usize,
    },
    StopVoice(VoiceId),
    StopAll,
}

enum Status {
    VoiceFinished(VoiceId),
}

struct Voice {
    id: VoiceId,
    audio: Shared<AudioArc>,
    frame: usize,
}

pub struct AudioEngineHandle {
    commands: rtrb::Producer<Command>,
    status: rtrb::Consumer<Status>,
    collector: Collector,
    handle: Handle,
    sample_rate: u32,
    channels: u16,
    /// Voices that ended before reaching the audio thread.
    finished_early: Vec<VoiceId>,
    stream: Option<cpal::Stream>,
}

/// Open the default output device and start an idle stream.
pub fn start() -> anyhow::Result<AudioEngineHandle> {
    let collector = Collector::new();
    let handle = collector.handle();

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(COMMAND_CAPACITY);
    let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(COMMAND_CAPACITY);

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let config = device.default_output_config()?;
    let sample_format = config.sample_format();
    let config: cpal::StreamConfig = config.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, command_rx, status_tx)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, command_rx, status_tx)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;

    log::info!(
        "audio output started: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    Ok(AudioEngineHandle {
        commands: command_tx,
        status: status_rx,
        collector,
        handle,
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        finished_early: Vec::new(),
        stream: Some(stream),
    })
}

impl AudioEngineHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, command: Command) -> Result<(), Command> {
        self.commands.push(command).map_err(|rtrb::PushError::Full(command)| command)
    }
}

impl VoiceSink for AudioEngineHandle {
    fn start_voice(
        &mut self,
        voice: VoiceId,
        audio: AudioArc,
        offset_secs: f64,
    ) -> anyhow::Result<()> {
        if !self.is_open() {
            anyhow::bail!("audio output is closed");
        }
        self.collector.collect();

        let audio = if audio.sample_rate() == self.sample_rate {
            audio
        } else {
            resample_audio_arc(&audio, self.sample_rate)?
        };

        let offset_frames = if offset_secs.is_finite() && offset_secs > 0.0 {
            (offset_secs * self.sample_rate as f64).round() as usize
        } else {
            0
        };
        if offset_frames >= audio.frames() {
            self.finished_early.push(voice);
            return Ok(());
        }

        let command = Command::StartVoice {
            voice,
            audio: Shared::new(&self.handle, audio),
            offset_frames,
        };
        if self.send(command).is_err() {
            anyhow::bail!("audio command queue is full");
        }
        Ok(())
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        if self.is_open() && self.send(Command::StopVoice(voice)).is_err() {
            log::warn!("audio command queue is full, voice {voice:?} not stopped");
        }
    }

    fn stop_all(&mut self) {
        if self.is_open() && self.send(Command::StopAll).is_err() {
            log::warn!("audio command queue is full, voices not stopped");
        }
    }

    fn finished_voices(&mut self) -> Vec<VoiceId> {
        let mut finished = std::mem::take(&mut self.finished_early);
        while let Ok(Status::VoiceFinished(voice)) = self.status.pop() {
            finished.push(voice);
        }
        self.collector.collect();
        finished
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.collector.collect();
            log::info!("audio output closed");
        }
    }
}

impl Drop for AudioEngineHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut command_rx: rtrb::Consumer<Command>,
    mut status_tx: rtrb::Producer<Status>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let mut voices: Vec<Voice> = Vec::with_capacity(MAX_VOICES);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(cmd) = command_rx.pop() {
                match cmd {
                    Command::StartVoice {
                        voice,
                        audio,
                        offset_frames,
                    } => {
                        if voices.len() < MAX_VOICES {
                            voices.push(Voice {
                                id: voice,
                                audio,
                                frame: offset_frames,
                            });
                        } else {
                            let _ = status_tx.push(Status::VoiceFinished(voice));
                        }
                    }
                    Command::StopVoice(id) => voices.retain(|v| v.id != id),
                    Command::StopAll => voices.clear(),
                }
            }

            for frame in data.chunks_mut(output_channels) {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    let mut mixed = 0.0f32;
                    for voice in &voices {
                        // Mono sources repeat on every output channel.
                        let clip_ch = ch % voice.audio.channels() as usize;
                        mixed += voice.audio.samples()
                            [voice.frame * voice.audio.channels() as usize + clip_ch];
                    }
                    *sample = T::from_sample(mixed);
                }

                let mut i = 0;
                while i < voices.len() {
                    voices[i].frame += 1;
                    if voices[i].frame >= voices[i].audio.frames() {
                        let done = voices.swap_remove(i);
                        let _ = status_tx.push(Status::VoiceFinished(done.id));
                    } else {
                        i += 1;
                    }
                }
            }
        },
        |err| log::error!("audio stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
