//! `drone-vision` — entry point for both roles of the master/slave
//! coordination protocol plus a local simulation mode for bench testing
//! without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use drone_core::camera::{FrameSource, NullRootSensor};
use drone_core::config::Settings;
use drone_core::coordinator::{MasterNode, SlaveNode};
use drone_core::protocol::Connection;
use drone_sim::{SimFrameSource, SimStereoCalibration};

#[derive(Parser, Debug)]
#[command(name = "drone-vision", about = "Two-camera blade inspection vision stack")]
struct Args {
    /// Settings TOML path
    #[arg(short, long, default_value = "settings.toml")]
    config: String,
    #[command(subcommand)]
    role: Role,
    /// Local health-check port (0 disables it).
    #[arg(long, default_value = "0")]
    health_port: u16,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run as the master: listens for the slave, drives the mission.
    Master {
        #[arg(long)]
        calibrate_stereopsis: bool,
        #[arg(long)]
        calibrate_blobs: bool,
    },
    /// Run as the slave: connects to the master, serves requests.
    Slave,
    /// Drive the synthetic camera standalone, for bench testing without
    /// a slave connection.
    Simulate {
        #[command(subcommand)]
        kind: SimulateKind,
        /// Number of capture iterations to run.
        #[arg(long, default_value = "10")]
        iterations: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SimulateKind {
    /// Repeated captures advancing the synthetic blade traversal.
    Video,
    /// A single capture pair.
    Image,
}

fn sim_frame_source(settings: &Settings) -> SimFrameSource {
    let (height, width) = settings.desired_frame_shape;
    SimFrameSource::new(width, height, settings.rho_step_distance.unwrap_or(20.0).max(4.0), 6.0, 4.0)
}

fn sim_stereo_calibration(settings: &Settings) -> SimStereoCalibration {
    let (height, width) = settings.desired_frame_shape;
    SimStereoCalibration::new(width, height, settings.focal_length_mm, settings.baseline_mm, settings.sensor_size_mm)
}

async fn health_check() -> &'static str {
    "drone-vision ok"
}

async fn serve_health(port: u16) {
    if port == 0 {
        return;
    }
    let app = Router::new().route("/health", get(health_check));
    match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            info!(port, "health endpoint listening");
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "health endpoint crashed");
            }
        }
        Err(e) => error!(error = %e, port, "failed to bind health endpoint"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "drone_core=info,drone_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    if args.health_port != 0 {
        tokio::spawn(serve_health(args.health_port));
    }

    let break_req = Arc::new(AtomicBool::new(false));
    let break_req_signal = break_req.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, requesting shutdown at next iteration boundary");
            break_req_signal.store(true, Ordering::Relaxed);
        }
    });

    match args.role {
        Role::Master { calibrate_stereopsis, calibrate_blobs } => {
            info!("starting master, waiting for slave to connect");
            let conn = Connection::accept_as_master(
                &settings.master_ip,
                settings.port,
                settings.master_buffer_size,
                settings.slave_buffer_size,
                settings.tcp_timeout_secs,
            )
            .await?;
            let frame_source = sim_frame_source(&settings);
            let calibration = Arc::new(sim_stereo_calibration(&settings));
            let node = MasterNode::new(conn, settings, Box::new(frame_source), calibration, Box::new(NullRootSensor), break_req);
            node.run(calibrate_stereopsis, calibrate_blobs).await?;
        }
        Role::Slave => {
            info!("starting slave, connecting to master");
            let conn = Connection::connect_as_slave(
                &settings.master_ip,
                settings.port,
                settings.slave_buffer_size,
                settings.master_buffer_size,
                settings.master_timeout_secs,
            )
            .await?;
            let frame_source = sim_frame_source(&settings);
            let calibration = Arc::new(sim_stereo_calibration(&settings));
            let node = SlaveNode::new(conn, settings, Box::new(frame_source), calibration);
            node.run().await?;
        }
        Role::Simulate { kind, iterations } => {
            let mut source = sim_frame_source(&settings);
            let runs = match kind {
                SimulateKind::Video => iterations,
                SimulateKind::Image => 1,
            };
            for i in 0..runs {
                source.arm().map_err(|e| anyhow::anyhow!("simulated capture arm failed: {e}"))?;
                let (normal, structured) = source.capture().map_err(|e| anyhow::anyhow!("simulated capture failed: {e}"))?;
                info!(
                    iteration = i,
                    normal_shape = ?normal.shape(),
                    structured_shape = ?structured.shape(),
                    "synthetic capture"
                );
            }
        }
    }

    Ok(())
}
