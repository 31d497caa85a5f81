use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::{mpsc, Mutex};

use muse_recorder::config::RecorderCli;
use muse_recorder::prelude::*;

type Lines = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Numbered list on stdout, answer on stdin; blank or unknown input cancels.
fn stdin_chooser(lines: Lines) -> DeviceChooser {
    Arc::new(move |devices: &[FoundDevice]| {
        if devices.is_empty() {
            println!("No headsets found.");
            return None;
        }
        for (i, d) in devices.iter().enumerate() {
            println!("  [{i}] {}  ({})", d.name, d.id);
        }
        print!("Pick a device (blank to cancel): ");
        io::stdout().flush().ok();
        let answer = lines.blocking_lock().blocking_recv()?;
        answer.parse().ok().filter(|&i: &usize| i < devices.len())
    })
}

fn print_help() {
    info!("Commands (type + Enter):");
    info!("  c          – connect a headset");
    info!("  r          – start / stop recording");
    info!("  l          – list connected headsets");
    info!("  d <name>   – disconnect a headset");
    info!("  p / u      – pause / resume all headsets");
    info!("  q          – quit");
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=muse_recorder=debug for per-sample output.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RecorderCli::parse().recorder;

    let status = StatusLine::new();
    let uploader = UploadClient::new(config.server.clone(), Arc::new(config.gateway()))?;
    let coordinator = RecordingCoordinator::new(Arc::new(uploader), status.clone());
    let registry = DeviceRegistry::new(coordinator.flag(), config.username.clone());
    info!(
        "Uploading to {} as {}{}",
        config.server,
        config.username,
        if config.simulate { " (simulated headsets)" } else { "" }
    );
    print_help();

    // ── Stdin relay ───────────────────────────────────────────────────────────
    // A dedicated thread owns the StdinLock; lines reach async code over a
    // channel that the device chooser can also read from.
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line.trim().to_owned()).is_err() {
                break;
            }
        }
    });
    let lines: Lines = Arc::new(Mutex::new(line_rx));
    let chooser = stdin_chooser(Arc::clone(&lines));

    let mut prune = tokio::time::interval(Duration::from_secs(1));
    let mut connects = 0usize;

    loop {
        let line = tokio::select! {
            _ = prune.tick() => {
                for name in registry.prune() {
                    status.report(StatusUpdate::Disconnected { device: name });
                }
                continue;
            }
            line = async { lines.lock().await.recv().await } => line,
        };
        let Some(line) = line else { break };
        let (cmd, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));

        match cmd {
            "" => {}
            "c" => {
                connects += 1;
                let source = config.new_source(connects, &chooser);
                match registry.connect(source, None).await {
                    Ok(session) => {
                        session.register_display(LogDisplay::new(session.name()));
                        status.report(StatusUpdate::Connected {
                            device: session.name().to_string(),
                        });
                    }
                    Err(ConnectError::Cancelled) => info!("Connect cancelled."),
                    Err(e @ ConnectError::DuplicateDevice(_)) => {
                        status.report(StatusUpdate::Notice(e.to_string()))
                    }
                    Err(e) => error!("Connect failed: {e}"),
                }
            }
            "r" => {
                coordinator.toggle(&registry);
            }
            "l" => {
                if registry.is_empty() {
                    info!("No headsets connected.");
                }
                for session in registry.sessions() {
                    let counts = session.buffered();
                    info!(
                        "{:16} received={:8}  buffered eeg={} ppg={} accel={} gyro={}",
                        session.name(),
                        session.samples_received(),
                        counts.eeg,
                        counts.ppg,
                        counts.accel,
                        counts.gyro
                    );
                }
            }
            "d" => match registry.disconnect(arg.trim()).await {
                Ok(true) => status.report(StatusUpdate::Disconnected {
                    device: arg.trim().to_string(),
                }),
                Ok(false) => warn!("No headset named '{}'.", arg.trim()),
                Err(e) => error!("Disconnect error: {e}"),
            },
            "p" | "u" => {
                for session in registry.sessions() {
                    let result = if cmd == "p" {
                        session.pause().await
                    } else {
                        session.resume().await
                    };
                    if let Err(e) = result {
                        error!("{}: {e}", session.name());
                    }
                }
            }
            "q" => break,
            other => {
                warn!("Unknown command '{other}'.");
                print_help();
            }
        }
    }

    // Stop a running recording so its sessions still get uploaded.
    if coordinator.state() == RecordingState::Recording {
        for upload in coordinator.toggle(&registry).uploads {
            if let Ok(Err(e)) = upload.handle.await {
                warn!("{}: {e}", upload.device);
            }
        }
    }
    registry.disconnect_all().await;
    info!("Bye.");
    Ok(())
}
