use crate::camera::Camera;
use crate::capture::{CaptureLoop, LoopCommand};
use crate::config::Config;
use crate::detector::PlateDetector;
use crate::gate::{self, GateController, GateMode};
use crate::recognition::RecognitionClient;

use tokio::io::AsyncBufReadExt;
use tokio::sync::{broadcast, mpsc};
use tokio::signal;

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let camera = match Camera::open(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let detector = match PlateDetector::from_config(&config.detector) {
        Ok(detector) => detector,
        Err(e) => {
            tracing::error!("Failed to initialize plate detector: {:?}", e);
            return Err(e.into());
        }
    };

    let client = RecognitionClient::new(&config.recognition)?;

    let actuator = gate::build_actuator(&config.gate);
    let controller = GateController::new(actuator, config.gate.mode, config.gate.open_duration());

    let (shutdown_tx, _) = broadcast::channel(1);
    let (command_tx, command_rx) = mpsc::channel(8);

    spawn_command_reader(command_tx);

    let capture_loop = CaptureLoop::new(camera, detector, client, controller, config, command_rx);
    let loop_handle = tokio::spawn(capture_loop.run(shutdown_tx.subscribe()));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;

    Ok(())
}

/// Reads operator commands from stdin: `entry` / `exit` switch the gate
/// mode, `quit` stops the loop. Anything else is reported and ignored.
fn spawn_command_reader(tx: mpsc::Sender<LoopCommand>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let command = match line.trim().to_lowercase().as_str() {
                "" => continue,
                "entry" | "m" => LoopCommand::SetMode(GateMode::Entry),
                "exit" | "k" => LoopCommand::SetMode(GateMode::Exit),
                "quit" | "q" => LoopCommand::Quit,
                other => {
                    tracing::warn!("unknown command: {other} (use entry/exit/quit)");
                    continue;
                }
            };

            let stop = command == LoopCommand::Quit;
            if tx.send(command).await.is_err() || stop {
                break;
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
