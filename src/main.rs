//! Terminal voice-note recorder.
//!
//! Commands (one per line):
//!   s            start        p  pause      r  resume
//!   x            stop         c  discard    t <title>  rename
//!   w [title]    save         q  quit

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use voxnote::audio::CpalBackend;
use voxnote::capability::Capabilities;
use voxnote::settings::{default_settings_path, load_settings, RecorderSettings};
use voxnote::upload::{get_api_token, HttpUploader};
use voxnote::{Recorder, RecorderView};

fn load_recorder_settings() -> RecorderSettings {
    let settings = match default_settings_path() {
        Ok(path) => {
            log::info!("Settings: {:?}", path);
            load_settings(&path)
        }
        Err(e) => {
            log::warn!("{}; using default settings", e);
            RecorderSettings::default()
        }
    };
    settings.with_env_overrides()
}

fn print_view(view: &RecorderView) {
    let secs = view.duration_ms / 1000;
    let mut line = format!(
        "[{:?}] {:02}:{:02} \"{}\"",
        view.status,
        secs / 60,
        secs % 60,
        view.title
    );
    if let Some(artifact) = &view.artifact {
        line.push_str(&format!(" ({}, {} bytes)", artifact.mime_type, artifact.size_bytes));
    }
    if let Some(path) = &view.playback {
        line.push_str(&format!(" play: {}", path.display()));
    }
    if view.saving {
        line.push_str(" saving...");
    }
    if let Some(error) = &view.error {
        line.push_str(&format!(" error: {}", error));
    }
    println!("{}", line);
}

#[tokio::main]
async fn main() {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = load_recorder_settings();
    let uploader = match HttpUploader::new(&settings.server_url, settings.upload_timeout(), get_api_token()) {
        Ok(uploader) => uploader,
        Err(e) => {
            log::error!("Failed to create uploader: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Saving recordings to {}", uploader.endpoint());

    let recorder = Recorder::spawn(
        Capabilities::detect(),
        Arc::new(CpalBackend::new()),
        Arc::new(uploader),
        settings,
    );

    let mut views = recorder.subscribe();
    let printer = tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            print_view(&view);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, Some(a.trim().to_string())),
            None => (line, None),
        };

        let sent = match command {
            "" => continue,
            "s" => recorder.start().await,
            "p" => recorder.pause().await,
            "r" => recorder.resume().await,
            "x" => recorder.stop().await,
            "w" => recorder.save(arg).await,
            "c" => recorder.reset().await,
            "t" => recorder.set_title(arg.unwrap_or_default()).await,
            "q" => break,
            other => {
                println!("Unknown command: {}", other);
                continue;
            }
        };
        if let Err(e) = sent {
            log::error!("{}", e);
            break;
        }
    }

    recorder.shutdown().await;
    printer.abort();
}
