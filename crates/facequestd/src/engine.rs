//! Engine thread: owns the camera, models, store, and uplink, and runs
//! one flow at a time.
//!
//! All requests funnel through a single mpsc receiver consumed by one
//! dedicated OS thread, so enroll/verify/reset can never interleave —
//! the single mutable template slot has exactly one writer by
//! construction, and a flow's settings snapshot cannot change under it
//! (settings mutations queue behind the flow like everything else).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use facequest_core::flow::{self, EnrollmentReport, OutcomeSink};
use facequest_core::onnx::{OnnxError, OnnxFaceEngine};
use facequest_core::types::OutcomeCode;
use facequest_core::{Metric, QualitySettings, TemplateStore, VerificationOutcome};
use facequest_hw::uplink::log_rx_line;
use facequest_hw::{Camera, CameraError, Uplink};

use crate::config::Config;
use crate::store::{SqliteTemplateStore, StoreError};

/// How often the reader thread drains uplink RX lines.
const RX_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("model error: {0}")]
    Model(#[from] OnnxError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pipeline(#[from] facequest_core::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Status snapshot for the D-Bus `Status` call.
#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub enrolled: bool,
    pub template: Option<TemplateInfo>,
    pub settings: QualitySettings,
    pub camera: String,
    pub uplink_connected: bool,
}

#[derive(Debug, Serialize)]
pub struct TemplateInfo {
    pub version: u32,
    pub created_at: String,
    pub detector: String,
    pub metric: String,
    pub sample_count: usize,
    pub fingerprint: Option<String>,
}

enum EngineRequest {
    Enroll {
        reply: oneshot::Sender<Result<EnrollmentReport, EngineError>>,
    },
    Verify {
        reply: oneshot::Sender<Result<VerificationOutcome, EngineError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
    Test {
        reply: oneshot::Sender<bool>,
    },
    SetMetric {
        metric: Metric,
        reply: oneshot::Sender<QualitySettings>,
    },
    SetThreshold {
        threshold: f32,
        reply: oneshot::Sender<Result<QualitySettings, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> EngineRequest,
    ) -> Result<R, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn enroll(&self) -> Result<EnrollmentReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll { reply }).await?
    }

    pub async fn verify(&self) -> Result<VerificationOutcome, EngineError> {
        self.request(|reply| EngineRequest::Verify { reply }).await?
    }

    pub async fn clear(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Clear { reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await?
    }

    /// Send TEST over the uplink. Returns whether an uplink is attached.
    pub async fn test(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Test { reply }).await
    }

    /// Switch the distance metric; the threshold resets to the metric's
    /// default. Returns the resulting settings.
    pub async fn set_metric(&self, metric: Metric) -> Result<QualitySettings, EngineError> {
        self.request(|reply| EngineRequest::SetMetric { metric, reply })
            .await
    }

    /// Set the match threshold in the current metric's units.
    pub async fn set_threshold(&self, threshold: f32) -> Result<QualitySettings, EngineError> {
        self.request(|reply| EngineRequest::SetThreshold { threshold, reply })
            .await?
    }
}

/// Best-effort sink over the shared uplink slot.
struct SharedUplinkSink(Arc<Mutex<Option<Uplink>>>);

impl OutcomeSink for SharedUplinkSink {
    fn send(&mut self, code: OutcomeCode) {
        match self.0.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(uplink) => uplink.send(code),
                None => tracing::debug!(code = code.as_line(), "no uplink attached, outcome dropped"),
            },
            Err(_) => tracing::warn!(code = code.as_line(), "uplink lock poisoned, outcome dropped"),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera, loads both ONNX models, opens the template store,
/// and attaches the uplink before entering the request loop. Fails fast
/// at startup if the camera, models, or store are unavailable; a missing
/// uplink only logs a warning (delivery is best-effort anyway).
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    camera.warm_up(config.warmup_frames)?;

    let mut detector = OnnxFaceEngine::load(&config.model_dir, config.quality.detector)?;
    let mut store = SqliteTemplateStore::open(&config.db_path, &config.key_path)?;

    let uplink = match &config.uplink_device {
        Some(path) => match Uplink::open(path, config.uplink_baud) {
            Ok(uplink) => Some(uplink),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "uplink unavailable; outcomes will not be relayed");
                None
            }
        },
        None => None,
    };
    let uplink = Arc::new(Mutex::new(uplink));
    spawn_rx_reader(Arc::clone(&uplink));

    let mut settings = config.quality.clone();
    let camera_path = config.camera_device.clone();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facequest-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { reply } => {
                        let snapshot = settings.clone();
                        let mut sink = SharedUplinkSink(Arc::clone(&uplink));
                        let result = run_enroll(&camera, &mut detector, &mut store, &mut sink, &snapshot);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify { reply } => {
                        let snapshot = settings.clone();
                        let mut sink = SharedUplinkSink(Arc::clone(&uplink));
                        let result = run_verify(&camera, &mut detector, &mut store, &mut sink, &snapshot);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Clear { reply } => {
                        let mut sink = SharedUplinkSink(Arc::clone(&uplink));
                        let result = flow::run_reset(&mut store, &mut sink).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let result = build_status(&store, &settings, &camera_path, &uplink);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Test { reply } => {
                        let mut sink = SharedUplinkSink(Arc::clone(&uplink));
                        sink.send(OutcomeCode::Test);
                        let attached = uplink.lock().map(|g| g.is_some()).unwrap_or(false);
                        let _ = reply.send(attached);
                    }
                    EngineRequest::SetMetric { metric, reply } => {
                        settings.set_metric(metric);
                        tracing::info!(%metric, threshold = settings.threshold, "metric changed");
                        let _ = reply.send(settings.clone());
                    }
                    EngineRequest::SetThreshold { threshold, reply } => {
                        let result = settings
                            .set_threshold(threshold)
                            .map(|_| settings.clone())
                            .map_err(EngineError::from);
                        if result.is_ok() {
                            tracing::info!(threshold, "threshold changed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

fn run_enroll(
    camera: &Camera,
    detector: &mut OnnxFaceEngine,
    store: &mut SqliteTemplateStore,
    sink: &mut SharedUplinkSink,
    settings: &QualitySettings,
) -> Result<EnrollmentReport, EngineError> {
    let mut source = camera.stream()?;
    Ok(flow::run_enrollment(&mut source, detector, store, sink, settings)?)
}

fn run_verify(
    camera: &Camera,
    detector: &mut OnnxFaceEngine,
    store: &mut SqliteTemplateStore,
    sink: &mut SharedUplinkSink,
    settings: &QualitySettings,
) -> Result<VerificationOutcome, EngineError> {
    let mut source = camera.stream()?;
    Ok(flow::run_verification(&mut source, detector, store, sink, settings)?)
}

fn build_status(
    store: &SqliteTemplateStore,
    settings: &QualitySettings,
    camera_path: &str,
    uplink: &Arc<Mutex<Option<Uplink>>>,
) -> Result<EngineStatus, EngineError> {
    let template = store.get()?;
    let fingerprint = store.fingerprint()?;
    let template = template.map(|t| TemplateInfo {
        version: t.version,
        created_at: t.created_at.to_rfc3339(),
        detector: t.detector.to_string(),
        metric: t.metric.to_string(),
        sample_count: t.sample_count,
        fingerprint,
    });

    Ok(EngineStatus {
        enrolled: template.is_some(),
        template,
        settings: settings.clone(),
        camera: camera_path.to_string(),
        uplink_connected: uplink.lock().map(|g| g.is_some()).unwrap_or(false),
    })
}

/// Drain and log micro:bit RX lines in the background.
fn spawn_rx_reader(uplink: Arc<Mutex<Option<Uplink>>>) {
    std::thread::Builder::new()
        .name("facequest-uplink-rx".into())
        .spawn(move || loop {
            std::thread::sleep(RX_POLL_INTERVAL);
            let lines = match uplink.lock() {
                Ok(mut guard) => match guard.as_mut() {
                    Some(u) => u.drain_lines(),
                    None => continue,
                },
                Err(_) => break,
            };
            for line in lines {
                log_rx_line(&line);
            }
        })
        .expect("failed to spawn uplink reader thread");
}
