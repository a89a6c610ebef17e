//! D-Bus interface for the FaceQuest daemon.
//!
//! Bus name: org.facequest.FaceQuest1
//! Object path: /org/facequest/FaceQuest1
//!
//! Flow-level failures surface as `Failed` errors whose messages carry
//! the counts and thresholds the client needs to render an actionable
//! prompt; "not enrolled" and "insufficient samples" are worded
//! distinctly from a plain no-match, which is a successful call with
//! `matched: false`.

use zbus::interface;

use facequest_core::Metric;

use crate::engine::{EngineError, EngineHandle};

pub struct FaceQuestService {
    engine: EngineHandle,
}

impl FaceQuestService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "org.facequest.FaceQuest1")]
impl FaceQuestService {
    /// Teach the device a face. Returns a JSON enrollment report.
    async fn enroll(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enroll requested");
        let report = self.engine.enroll().await.map_err(failed)?;
        Ok(serde_json::json!({
            "samples": report.sample_count,
            "metric": report.metric.to_string(),
            "created_at": report.created_at.to_rfc3339(),
        })
        .to_string())
    }

    /// Verify the current face against the enrolled template.
    /// Returns a JSON outcome: matched, median, pass_rate, frames.
    async fn verify(&self) -> zbus::fdo::Result<String> {
        tracing::info!("verify requested");
        let outcome = self.engine.verify().await.map_err(failed)?;
        Ok(serde_json::json!({
            "matched": outcome.is_match,
            "median": outcome.median,
            "pass_rate": outcome.pass_rate,
            "frames": outcome.sample_count,
        })
        .to_string())
    }

    /// Delete the enrolled template.
    async fn clear(&self) -> zbus::fdo::Result<()> {
        tracing::info!("clear requested");
        self.engine.clear().await.map_err(failed)
    }

    /// Daemon status as JSON: enrollment state, template metadata,
    /// active settings, camera and uplink state.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        let mut value = serde_json::to_value(&status).map_err(|e| {
            zbus::fdo::Error::Failed(format!("status serialization: {e}"))
        })?;
        value["version"] = serde_json::json!(env!("CARGO_PKG_VERSION"));
        Ok(value.to_string())
    }

    /// Send TEST over the uplink. Returns whether an uplink is attached.
    async fn test(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("uplink test requested");
        self.engine.test().await.map_err(failed)
    }

    /// Switch the distance metric ("euclidean" or "cosine"). The match
    /// threshold resets to the new metric's default. Returns the
    /// resulting settings as JSON.
    async fn set_metric(&self, metric: &str) -> zbus::fdo::Result<String> {
        let metric: Metric = metric
            .parse()
            .map_err(|e: facequest_core::Error| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let settings = self.engine.set_metric(metric).await.map_err(failed)?;
        settings_json(&settings)
    }

    /// Set the match threshold in the current metric's units.
    async fn set_threshold(&self, threshold: f64) -> zbus::fdo::Result<String> {
        let settings = self
            .engine
            .set_threshold(threshold as f32)
            .await
            .map_err(failed)?;
        settings_json(&settings)
    }
}

fn settings_json(settings: &facequest_core::QualitySettings) -> zbus::fdo::Result<String> {
    serde_json::to_string(settings)
        .map_err(|e| zbus::fdo::Error::Failed(format!("settings serialization: {e}")))
}
