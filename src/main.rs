use co2_frames::config::{self, Config, DEFAULT_CONFIG_PATH};
use co2_frames::ingest::HttpArchive;
use co2_frames::logging::{self, LogLevel, Stage};
use co2_frames::pipeline::{CancelToken, Pipeline};
use co2_frames::sink::ManifestSink;
use std::env;
use std::path::Path;
use std::process::ExitCode;

fn load(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    if Path::new(path).exists() {
        Ok(config::load_config(path)?)
    } else {
        Ok(Config::default())
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let config_path = env::var("CO2_FRAMES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = load(&config_path)?;
    config.apply_env_overrides(|k| env::var(k).ok())?;

    let level: LogLevel = config.output.log_level.parse()?;
    logging::init_logger(level, config.output.log_file.as_deref(), config.output.console_timestamps);

    let collection = config.collection()?;
    let window = config.window()?;
    let credentials = config::credentials_from_env(|k| env::var(k).ok())?;

    logging::info(Stage::Run, None, &config.describe_request());

    let archive = HttpArchive::new(&config.archive.base_url, config.session_options(), config.listing_timeout())?;
    let mut pipeline = Pipeline::new(archive, collection);
    let mut sink = ManifestSink::new(&config.output.manifest_path);

    let (summary, completed) = match pipeline.run(&window, &credentials, &mut sink, &CancelToken::new()) {
        Ok(summary) => (summary, true),
        Err(aborted) => (aborted.progress, false),
    };

    if let Some(reason) = &summary.zero_result_reason {
        logging::warn(Stage::Run, None, reason);
    }
    sink.write(&summary)?;
    logging::info(
        Stage::Run,
        None,
        &format!("Manifest written to {}", sink.path().display()),
    );

    Ok(completed)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("co2_frames: {}", e);
            ExitCode::FAILURE
        }
    }
}
