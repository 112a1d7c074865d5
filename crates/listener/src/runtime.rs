//! Listener runtime.
//!
//! One event loop thread owns the [`PlaybackController`]. The feed reader and the console
//! only send events to it, so chunk handling and play/stop never run concurrently; the
//! output pull runs on the audio thread and meets the controller only at the queue lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use audio_player::controller::PlaybackController;
use audio_player::device::{self, CpalOutputFactory};
use crossbeam_channel::Receiver;
use live_audio_types::PlaybackState;

use crate::config::ListenConfig;
use crate::console::{self, ConsoleCommand};
use crate::events::ListenerEvent;
use crate::net;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopControl {
    Continue,
    Exit,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Connect to the feed and run the console-driven listener until quit or Ctrl-C.
pub fn run_listen(config: ListenConfig) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));

    {
        let tx = tx.clone();
        let _ = ctrlc::set_handler(move || {
            let _ = tx.send(ListenerEvent::Shutdown);
        });
    }

    let factory = CpalOutputFactory::new(
        cpal::default_host(),
        normalize_device_name(config.device.clone()),
        config.playback.sample_rate,
    );
    let mut controller = PlaybackController::new(config.playback.clone(), Box::new(factory));
    tracing::info!(
        connect = %config.connect,
        block_size = controller.block_size(),
        cap_samples = ?config.playback.max_buffered_samples,
        "listener ready"
    );

    if config.autoplay {
        toggle(&mut controller);
    }

    let _reader = net::spawn_channel_reader(
        config.connect,
        config.reconnect_delay,
        shutdown.clone(),
        tx.clone(),
    );
    let _console = console::spawn_console(tx);
    println!("{}", console::HELP);

    run_event_loop(&mut controller, &rx);

    shutdown.store(true, Ordering::Relaxed);
    controller.stop();
    tracing::info!("listener shut down");
    Ok(())
}

pub(crate) fn run_event_loop(controller: &mut PlaybackController, rx: &Receiver<ListenerEvent>) {
    while let Ok(event) = rx.recv() {
        if handle_event(controller, event) == LoopControl::Exit {
            break;
        }
    }
}

pub(crate) fn handle_event(controller: &mut PlaybackController, event: ListenerEvent) -> LoopControl {
    match event {
        ListenerEvent::Chunk { kind, payload } => controller.handle_chunk(kind, &payload),
        ListenerEvent::Connected(addr) => tracing::info!(addr = %addr, "feed connected"),
        ListenerEvent::StreamInfo {
            sample_rate,
            channels,
        } => {
            let expected = controller.config().sample_rate;
            if sample_rate != expected {
                tracing::warn!(
                    feed_hz = sample_rate,
                    output_hz = expected,
                    "feed rate differs from output rate; use --sample-rate to match"
                );
            }
            if channels != 1 {
                tracing::error!(
                    channels,
                    "feed is not mono; its chunks are dropped until it sends mono audio"
                );
            }
            tracing::info!(rate_hz = sample_rate, channels, "feed stream info");
        }
        ListenerEvent::RemoteError(message) => tracing::warn!("feed reported error: {message}"),
        ListenerEvent::Disconnected(reason) => {
            tracing::info!("feed disconnected ({reason}); will reconnect")
        }
        ListenerEvent::Console(cmd) => match cmd {
            ConsoleCommand::Toggle => {
                toggle(controller);
            }
            ConsoleCommand::Play => {
                if !controller.is_playing() {
                    toggle(controller);
                }
            }
            ConsoleCommand::Stop => {
                if controller.is_playing() {
                    toggle(controller);
                }
            }
            ConsoleCommand::Status => print_status(controller),
            ConsoleCommand::Quit => return LoopControl::Exit,
        },
        ListenerEvent::Shutdown => return LoopControl::Exit,
    }
    LoopControl::Continue
}

/// Flip between playing and stopped and report the new state right away.
///
/// A failed `play()` is reported and leaves the listener stopped.
pub(crate) fn toggle(controller: &mut PlaybackController) -> PlaybackState {
    if controller.is_playing() {
        controller.stop();
    } else if let Err(e) = controller.play() {
        tracing::error!("cannot start playback: {e:#}");
    }
    let state = controller.state();
    println!("[{}]", state.label());
    state
}

fn print_status(controller: &PlaybackController) {
    match serde_json::to_string_pretty(&controller.status()) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!("status encode failed: {e}"),
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
