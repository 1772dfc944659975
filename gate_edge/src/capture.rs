use crate::camera::Camera;
use crate::config::Config;
use crate::detector::PlateDetector;
use crate::enhance;
use crate::extract;
use crate::gate::{GateController, GateDecision, GateMode};
use crate::recognition::{PlateReading, RecognitionClient, RecognitionError};
use crate::validate;
use opencv::{core::Mat, prelude::*};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::instrument;

const FAILED_READ_BACKOFF: Duration = Duration::from_millis(100);

/// Commands injected into the loop from outside (operator console).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopCommand {
    SetMode(GateMode),
    Quit,
}

/// Single-threaded orchestration of the edge pipeline. One frame is carried
/// all the way through gate actuation before the next is considered, which
/// keeps decisions for the same gate strictly serialized without locks.
pub struct CaptureLoop {
    camera: Camera,
    detector: PlateDetector,
    client: RecognitionClient,
    controller: GateController,
    config: Config,
    commands: mpsc::Receiver<LoopCommand>,
}

impl CaptureLoop {
    pub fn new(
        camera: Camera,
        detector: PlateDetector,
        client: RecognitionClient,
        controller: GateController,
        config: Config,
        commands: mpsc::Receiver<LoopCommand>,
    ) -> Self {
        Self {
            camera,
            detector,
            client,
            controller,
            config,
            commands,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let frame_skip = self.config.camera.process_every_n_frames.max(1);
        let mut frame_count: u64 = 0;

        tracing::info!(
            camera = self.camera.index(),
            frame_skip,
            mode = %self.controller.mode(),
            "capture loop started"
        );

        loop {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("capture loop received shutdown signal");
                break;
            }

            match self.drain_commands() {
                CommandOutcome::Quit => break,
                CommandOutcome::Continue => {}
            }

            let frame = match self.camera.capture_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("failed to read frame: {e}");
                    sleep(FAILED_READ_BACKOFF).await;
                    continue;
                }
            };
            if frame.empty() {
                tracing::warn!("camera returned an empty frame");
                sleep(FAILED_READ_BACKOFF).await;
                continue;
            }

            frame_count += 1;
            if frame_count % frame_skip != 0 {
                // Frame-skip throttling bounds CPU load on the edge node.
                tokio::task::yield_now().await;
                continue;
            }

            self.process_frame(&frame).await;
        }

        tracing::info!("capture loop stopped");
    }

    fn drain_commands(&mut self) -> CommandOutcome {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                LoopCommand::SetMode(mode) => {
                    self.controller.set_mode(mode);
                    tracing::info!(%mode, "gate mode switched");
                }
                LoopCommand::Quit => return CommandOutcome::Quit,
            }
        }
        CommandOutcome::Continue
    }

    /// Runs every validated candidate of one frame through crop, enhance,
    /// recognize and actuate, in detection order. A failure in one candidate
    /// is logged and skipped; it never aborts the loop.
    #[instrument(skip(self, frame))]
    async fn process_frame(&mut self, frame: &Mat) {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!("plate detection failed: {e}");
                return;
            }
        };

        for detection in detections {
            if !validate::is_plausible_plate(&self.config.validation, &detection) {
                continue;
            }

            let crop = match extract::crop_plate(frame, &detection, &self.config.crop) {
                Ok(crop) => crop,
                Err(e) => {
                    tracing::warn!("failed to extract plate region: {e}");
                    continue;
                }
            };

            let enhanced = match enhance::prepare_for_ocr(&crop, &self.config.enhancement) {
                Ok(enhanced) => enhanced,
                Err(e) => {
                    tracing::warn!("failed to enhance plate crop: {e}");
                    continue;
                }
            };

            let outcome = self
                .client
                .recognize(&enhanced, self.controller.mode())
                .await;
            let decision = decision_for(outcome, detection.confidence);

            if let Err(fault) = self.controller.execute(decision).await {
                tracing::error!(%fault, "actuator fault, gate forced closed");
            }
        }
    }
}

enum CommandOutcome {
    Continue,
    Quit,
}

/// Maps the recognition outcome to a gate decision. Every failure resolves
/// as a deny carrying a human-readable reason; an allow only ever comes from
/// an explicit OPEN verdict of the service.
fn decision_for(
    outcome: Result<PlateReading, RecognitionError>,
    detection_confidence: f32,
) -> GateDecision {
    match outcome {
        Ok(reading) => {
            tracing::info!(
                plate = %reading.plate_text,
                ocr_confidence = reading.confidence,
                detection_confidence,
                characters = reading.character_count,
                "recognition result"
            );
            match reading.action {
                plate_wire::GateAction::Open => GateDecision::Open {
                    message: reading.message,
                },
                plate_wire::GateAction::Deny => GateDecision::Deny {
                    reason: if reading.message.is_empty() {
                        "denied by recognition service".to_string()
                    } else {
                        reading.message
                    },
                },
            }
        }
        Err(err) => GateDecision::Deny {
            reason: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plate_wire::GateAction;

    fn reading(action: GateAction, message: &str) -> PlateReading {
        PlateReading {
            plate_text: "B1234XYZ".into(),
            confidence: 0.9,
            character_count: 8,
            action,
            message: message.into(),
        }
    }

    #[test]
    fn open_verdict_becomes_open_decision() {
        let decision = decision_for(Ok(reading(GateAction::Open, "welcome")), 0.8);
        assert_eq!(
            decision,
            GateDecision::Open {
                message: "welcome".into()
            }
        );
    }

    #[test]
    fn deny_verdict_keeps_service_reason() {
        let decision = decision_for(Ok(reading(GateAction::Deny, "vehicle not registered")), 0.8);
        assert_eq!(
            decision,
            GateDecision::Deny {
                reason: "vehicle not registered".into()
            }
        );
    }

    #[test]
    fn deny_verdict_without_message_gets_a_default_reason() {
        let decision = decision_for(Ok(reading(GateAction::Deny, "")), 0.8);
        match decision {
            GateDecision::Deny { reason } => assert!(!reason.is_empty()),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn recognition_error_resolves_as_deny_with_reason() {
        let decision = decision_for(
            Err(RecognitionError::Rejected("status 500: model crashed".into())),
            0.8,
        );
        match decision {
            GateDecision::Deny { reason } => {
                assert!(reason.contains("model crashed"));
            }
            other => panic!("expected deny, got {:?}", other),
        }
    }
}
