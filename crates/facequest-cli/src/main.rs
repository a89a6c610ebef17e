use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facequest_hw::Camera;

#[zbus::proxy(
    interface = "org.facequest.FaceQuest1",
    default_service = "org.facequest.FaceQuest1",
    default_path = "/org/facequest/FaceQuest1"
)]
trait FaceQuest {
    async fn enroll(&self) -> zbus::Result<String>;
    async fn verify(&self) -> zbus::Result<String>;
    async fn clear(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn test(&self) -> zbus::Result<bool>;
    async fn set_metric(&self, metric: &str) -> zbus::Result<String>;
    async fn set_threshold(&self, threshold: f64) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facequest", about = "FaceQuest face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Teach the device your face
    Enroll,
    /// Verify your face against the enrolled template
    Verify,
    /// Forget the enrolled face
    Clear,
    /// Show daemon status
    Status,
    /// Send TEST over the micro:bit uplink
    Test,
    /// Switch the distance metric (resets the threshold to its default)
    SetMetric {
        /// "euclidean" or "cosine"
        metric: String,
    },
    /// Set the match threshold in the current metric's units
    SetThreshold {
        threshold: f64,
    },
    /// Capture one camera frame to a PNG, bypassing the daemon
    Snapshot {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Output file
        #[arg(short, long, default_value = "snapshot.png")]
        out: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Snapshot talks to the camera directly; everything else needs the daemon.
    if let Commands::Snapshot { device, out } = &cli.command {
        return snapshot(device, out);
    }

    let connection = zbus::Connection::session()
        .await
        .context("failed to reach the session bus")?;
    let proxy = FaceQuestProxy::new(&connection)
        .await
        .context("is facequestd running?")?;

    match cli.command {
        Commands::Enroll => {
            println!("Teaching mode — hold still and look at the camera...");
            let report = proxy.enroll().await.context("enrollment failed")?;
            let report: serde_json::Value = serde_json::from_str(&report)?;
            println!(
                "Face learned ({} samples averaged, {} metric).",
                report["samples"], report["metric"]
            );
        }
        Commands::Verify => {
            println!("Scanning — hold still...");
            let outcome = proxy.verify().await.context("verification failed")?;
            let outcome: serde_json::Value = serde_json::from_str(&outcome)?;
            let pass_pct = (outcome["pass_rate"].as_f64().unwrap_or(0.0) * 100.0).round();
            if outcome["matched"].as_bool() == Some(true) {
                println!(
                    "Match (median {:.3}, {pass_pct}% of {} frames passed)",
                    outcome["median"].as_f64().unwrap_or(f64::NAN),
                    outcome["frames"]
                );
            } else {
                println!(
                    "No match (median {:.3}, {pass_pct}% of {} frames passed)",
                    outcome["median"].as_f64().unwrap_or(f64::NAN),
                    outcome["frames"]
                );
                std::process::exit(1);
            }
        }
        Commands::Clear => {
            proxy.clear().await.context("clear failed")?;
            println!("Enrolled face cleared.");
        }
        Commands::Status => {
            let status = proxy.status().await.context("status failed")?;
            let status: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Test => {
            if proxy.test().await.context("test failed")? {
                println!("TEST sent over the uplink.");
            } else {
                println!("No uplink attached.");
            }
        }
        Commands::SetMetric { metric } => {
            let settings = proxy.set_metric(&metric).await.context("set-metric failed")?;
            let settings: serde_json::Value = serde_json::from_str(&settings)?;
            println!(
                "Metric set to {} (threshold reset to {}).",
                settings["metric"], settings["threshold"]
            );
        }
        Commands::SetThreshold { threshold } => {
            let settings = proxy
                .set_threshold(threshold)
                .await
                .context("set-threshold failed")?;
            let settings: serde_json::Value = serde_json::from_str(&settings)?;
            println!(
                "Threshold set to {} ({} metric).",
                settings["threshold"], settings["metric"]
            );
        }
        Commands::Snapshot { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Capture one frame and save it as PNG — a quick way to check framing,
/// focus, and lighting without going through the daemon.
fn snapshot(device: &str, out: &str) -> Result<()> {
    let camera = Camera::open(device).with_context(|| format!("failed to open {device}"))?;
    camera.warm_up(2)?;

    let mut stream = camera.stream()?;
    let frame = stream.capture()?;

    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data)
        .context("frame buffer did not match its dimensions")?;
    image.save(out).with_context(|| format!("failed to write {out}"))?;

    println!("Saved {}x{} frame to {out}", frame.width, frame.height);
    Ok(())
}
