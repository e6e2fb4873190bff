mod config;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use config::Config;
use daw_core::clip_ops::{content_end, content_end_secs};
use daw_core::{FileStore, KeyValueStore, MemoryStore, Session, SessionError};

const USAGE: &str = "usage:
  daw info [project.json]
  daw render [project.json] <out.wav>
  daw play [project.json]

Without a project file the auto-saved arrangement is used.";

enum Command {
    Info(Option<PathBuf>),
    Render(Option<PathBuf>, PathBuf),
    Play(Option<PathBuf>),
}

fn parse_args(args: &[String]) -> Option<Command> {
    let (name, rest) = args.split_first()?;
    match (name.as_str(), rest) {
        ("info", []) => Some(Command::Info(None)),
        ("info", [project]) => Some(Command::Info(Some(project.into()))),
        ("render", [out]) => Some(Command::Render(None, out.into())),
        ("render", [project, out]) => Some(Command::Render(Some(project.into()), out.into())),
        ("play", []) => Some(Command::Play(None)),
        ("play", [project]) => Some(Command::Play(Some(project.into()))),
        _ => None,
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    let config = Config::load();
    match run(command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &Config) -> Result<(), SessionError> {
    match command {
        Command::Info(project) => {
            let session = open(project.as_deref(), config)?;
            print_info(&session);
            Ok(())
        }
        Command::Render(project, out) => {
            let mut session = open(project.as_deref(), config)?;
            session.export_wav(&out)?;
            println!(
                "wrote {:.2}s to {}",
                content_end_secs(session.arrangement()),
                out.display()
            );
            Ok(())
        }
        Command::Play(project) => {
            let session = open(project.as_deref(), config)?.with_default_output()?;
            play_to_end(session)
        }
    }
}

/// A project file is opened into a throwaway store so the user's auto-save
/// is left alone.
fn open(project: Option<&Path>, config: &Config) -> Result<Session, SessionError> {
    let session_config = config.session_config();
    let Some(path) = project else {
        let dir = config.store_dir();
        let store: Box<dyn KeyValueStore> = match FileStore::open(&dir) {
            Ok(store) => Box::new(store),
            Err(e) => {
                log::warn!("store {} unavailable, starting empty: {e}", dir.display());
                Box::new(MemoryStore::new())
            }
        };
        return Ok(Session::new(store, session_config));
    };

    let mut session = Session::new(Box::new(MemoryStore::new()), session_config);
    let report = session.open_project(path)?;
    for offline in &report.offline_clips {
        println!("offline clip {} ({}): {}", offline.clip_id.0, offline.name, offline.error);
    }
    Ok(session)
}

fn print_info(session: &Session) {
    let arrangement = session.arrangement();
    let time = arrangement.time();
    let mode = if time.mode.is_seconds() { "seconds" } else { "beats" };

    println!("tempo: {} bpm ({mode} mode)", time.bpm);
    println!("length: {}", time.format_seconds(content_end(arrangement)));
    println!("sounds: {}", session.sounds().len());
    for track in arrangement.tracks() {
        println!("{} ({} clips)", track.name, track.clips().len());
        for clip in track.clips() {
            println!(
                "  {} at {} [{}]",
                clip.asset.name,
                time.format_position(clip.start),
                time.format_seconds(clip.start)
            );
        }
    }
}

fn play_to_end(mut session: Session) -> Result<(), SessionError> {
    let end = content_end(session.arrangement());
    if end <= 0.0 {
        return Err(SessionError::NothingToExport);
    }

    let voices = session.play(Instant::now())?;
    log::info!("playing with {voices} clips scheduled");

    let time = *session.arrangement().time();
    loop {
        std::thread::sleep(Duration::from_millis(50));
        let position = session.tick(Instant::now());
        print!("\r{}  ", time.format_seconds(position));
        let _ = std::io::stdout().flush();
        if position >= end {
            break;
        }
    }
    println!();
    session.stop();
    Ok(())
}
