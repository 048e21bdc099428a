use antenna_controller::{
    AntennaController, mock::MockController, serial::SerialAntennaController,
};
use clap::Parser;
use srt::{Acquisition, ExternalAcquisition, Srt};
use srt_server::{Server, ServerConfig};
use std::sync::Arc;
use tracking::{Sky, SystemClock};

/// Mount control server of the small radio telescope
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "srt.toml")]
    config: String,

    /// Drive a simulated mount instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Listening port, overrides the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    if let Some(port) = args.port {
        config.server.port = port;
    }

    let link: Box<dyn AntennaController> = if args.simulate {
        log::info!("Using a simulated mount");
        Box::new(MockController::new())
    } else {
        if config.serial.port.is_empty() {
            eprintln!("No serial port configured: set serial.port or run with --simulate");
            std::process::exit(1);
        }

        log::info!(
            "Mount on {} at {} baud",
            config.serial.port,
            config.serial.baud_rate
        );
        Box::new(SerialAntennaController::new(
            &config.serial.port,
            config.serial.baud_rate,
            config.serial.timeout(),
        ))
    };

    log::info!(
        "Site: lat={}, lon={}, alt={}m",
        config.observer.latitude,
        config.observer.longitude,
        config.observer.altitude
    );

    let acquisition = config.acquisition.program.as_ref().map(|program| {
        let mut acquisition = ExternalAcquisition::new(
            program,
            &config.acquisition.data_dir,
            config.acquisition.device_args.as_str(),
        );
        if let Some(student_dir) = &config.acquisition.student_dir {
            acquisition = acquisition.with_student_dir(student_dir);
        }

        Arc::new(acquisition) as Arc<dyn Acquisition>
    });

    let srt = Srt::start(
        link,
        Arc::new(Sky::new(config.observer)),
        Arc::new(SystemClock),
        config.mount.clone(),
        acquisition,
    );

    let server = Server::bind((config.server.host.as_str(), config.server.port), srt.clone())
        .await
        .unwrap_or_else(|err| {
            eprintln!(
                "Failed to listen on {}:{}: {}",
                config.server.host, config.server.port, err
            );
            std::process::exit(1);
        });

    server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Shutting down");
        })
        .await;

    srt.shutdown().await;
}
