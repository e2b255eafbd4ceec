use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{PresenceProbe, StabilityTracker, VarianceProbe};
use rollcall_hw::Camera;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn start_session(&self) -> zbus::Result<String>;
    fn stop_session(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
    fn recent_results(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance capture CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a capture session on the daemon
    Start,
    /// Stop the current capture session
    Stop,
    /// Show daemon session status
    Status,
    /// Show recent recognitions
    Results,
    /// List video capture devices
    Devices,
    /// Sample the camera directly and print presence signals
    Test {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Number of frames to sample
        #[arg(short = 'n', long, default_value_t = 60)]
        frames: usize,
        /// Variance above which a frame counts as present
        #[arg(long, default_value_t = rollcall_core::stability::DEFAULT_PRESENCE_THRESHOLD)]
        threshold: f32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let proxy = connect(cli.session_bus).await?;
            let id = proxy.start_session().await.context("StartSession failed")?;
            println!("session started: {id}");
        }
        Commands::Stop => {
            let proxy = connect(cli.session_bus).await?;
            proxy.stop_session().await.context("StopSession failed")?;
            println!("session stopped");
        }
        Commands::Status => {
            let proxy = connect(cli.session_bus).await?;
            let status = proxy.status().await.context("Status failed")?;
            print_json(&status);
        }
        Commands::Results => {
            let proxy = connect(cli.session_bus).await?;
            let results = proxy.recent_results().await.context("RecentResults failed")?;
            print_json(&results);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no video capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test {
            device,
            frames,
            threshold,
        } => run_camera_test(&device, frames, threshold)?,
    }

    Ok(())
}

async fn connect(session_bus: bool) -> Result<AttendanceProxy<'static>> {
    let conn = if session_bus {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld not reachable")
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| raw.to_string())),
        Err(_) => println!("{raw}"),
    }
}

/// Bypass the daemon: open the camera, sample frames, show what the
/// stability tracker would see.
fn run_camera_test(device: &str, frames: usize, threshold: f32) -> Result<()> {
    println!("Running camera diagnostics on {device}...");
    let mut camera = Camera::open(device, 640, 480).context("failed to open camera")?;
    println!(
        "opened {}x{} ({:?})",
        camera.width,
        camera.height,
        camera.pixel_format()
    );

    let probe = VarianceProbe::default();
    let mut tracker = StabilityTracker::new(threshold);
    let mut skipped = 0usize;

    for i in 0..frames {
        let frame = camera.grab().context("capture failed")?;
        let Some(signal) = probe.probe(&frame.data, frame.width, frame.height) else {
            skipped += 1;
            continue;
        };
        let present = tracker.is_present(signal);
        let counter = tracker.observe(signal);
        println!(
            "{i:>4}  variance {:>9.1}  brightness {:>5.1}  {}{}  counter {counter}",
            signal.value(),
            frame.avg_brightness(),
            if present { "present" } else { "absent " },
            if frame.is_dark { "  dark" } else { "" },
        );
    }

    if skipped > 0 {
        println!("{skipped} frame(s) could not be sampled");
    }
    Ok(())
}
