use std::{path::PathBuf, process};

use structopt::StructOpt;
use tokio::signal;
use tracing::warn;
use tracing_subscriber::FmtSubscriber;

use fedsum_server::{api, coordinator::Coordinator, services::MessageHandler, settings::Settings};

#[derive(Debug, StructOpt)]
#[structopt(name = "Coordinator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        party: party_settings,
        model: model_settings,
        log: log_settings,
    } = settings;

    FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let (coordinator, requests_tx, event_subscriber) =
        Coordinator::new(party_settings, model_settings);
    let message_handler = MessageHandler::new(&event_subscriber, requests_tx);

    tokio::select! {
        _ = coordinator.run() => {
            warn!("shutting down: coordinator terminated");
        }
        res = api::serve(api_settings, message_handler) => {
            if let Err(err) = res {
                eprintln!("{}", err);
                process::exit(1);
            }
            warn!("shutting down: websocket server terminated");
        }
        _ = signal::ctrl_c() => {}
    }
}
