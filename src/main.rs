use retrospector::app::App;
use retrospector::cli::{Cli, Commands, ConfigAction};
use retrospector::config::Config;
use retrospector::error::{Result, RetroError};
use retrospector::model::{Entity, Ioc};
use retrospector::transport::{with_write_queue, BlobLocation};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};

/// EX_TEMPFAIL: the scheduler should redeliver the trigger
const EXIT_RETRYABLE: i32 = 75;

/// IOCs per repository put when loading a feed file
const IOC_PUT_BATCH: usize = 500;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!(kind = %e.kind(), retryable = e.is_retryable(), "{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(if e.is_retryable() { EXIT_RETRYABLE } else { 1 });
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "retrospector=debug"
    } else {
        "retrospector=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Write {
            region,
            container,
            path,
            input,
        } => cmd_write(cli.config, BlobLocation::new(region, container, path), &input),
        Commands::Store { event } => cmd_store(cli.config, &event),
        Commands::Detect { event } => cmd_detect(cli.config, &event),
        Commands::PutIocs { input } => cmd_put_iocs(cli.config, &input),
        Commands::Scan { input } => cmd_scan(cli.config, &input),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RetroError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_write(config_path: Option<PathBuf>, location: BlobLocation, input: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let app = App::from_config(&config)?;
    let entities: Vec<Entity> = read_json_lines(input)?;

    let count = entities.len();
    with_write_queue(
        app.transport.store().as_ref(),
        location.clone(),
        config.queue_options(),
        |queue| {
            for entity in entities {
                queue.write(entity)?;
            }
            Ok(())
        },
    )?;

    println!("✓ Wrote {} entities to {}", count, location);
    Ok(())
}

fn cmd_store(config_path: Option<PathBuf>, event: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let app = App::from_config(&config)?;
    let raw = read_input(event)?;

    let stored = runtime()?.block_on(app.entity_store().handle(&raw))?;
    println!("✓ Stored {} entities", stored);
    Ok(())
}

fn cmd_detect(config_path: Option<PathBuf>, event: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let app = App::from_config(&config)?;
    let detector = app.detector()?;
    let raw = read_input(event)?;

    let detections = runtime()?.block_on(detector.handle(&raw))?;
    for detection in &detections {
        match &detection.alert {
            Some(alert) => {
                println!(
                    "⚠ {}: {} matched value(s) in {} entities, alert sent",
                    detection.location,
                    alert.matches.len(),
                    detection.scanned
                );
                for value in alert.matched_values() {
                    println!("  - {}", value);
                }
            }
            None => println!(
                "✓ {}: no match in {} entities",
                detection.location, detection.scanned
            ),
        }
    }
    Ok(())
}

fn cmd_put_iocs(config_path: Option<PathBuf>, input: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let app = App::from_config(&config)?;
    let iocs: Vec<Ioc> = read_json_lines(input)?;

    runtime()?.block_on(async {
        for chunk in iocs.chunks(IOC_PUT_BATCH) {
            app.service.put_ioc_set(chunk).await?;
        }
        Ok::<_, RetroError>(())
    })?;

    println!("✓ Stored {} IOCs", iocs.len());
    Ok(())
}

fn cmd_scan(config_path: Option<PathBuf>, input: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let app = App::from_config(&config)?;
    let iocs: Vec<Ioc> = read_json_lines(input)?;

    let entities = runtime()?.block_on(app.service.get_entities(&iocs))?;
    for entity in &entities {
        let line = serde_json::to_string(entity).map_err(|e| RetroError::Json {
            source: e,
            context: "Failed to serialize entity".to_string(),
        })?;
        println!("{}", line);
    }
    tracing::info!("{} stored entities matched {} IOCs", entities.len(), iocs.len());
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let rendered = toml::to_string_pretty(&config)?;
            println!("{}", rendered);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RetroError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'retrospector config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn read_input(path: &Path) -> Result<String> {
    let mut content = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| RetroError::Io {
                source: e,
                context: "Failed to read stdin".to_string(),
            })?;
    } else {
        content = std::fs::read_to_string(path).map_err(|e| RetroError::Io {
            source: e,
            context: format!("Failed to read input file: {}", path.display()),
        })?;
    }
    Ok(content)
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = read_input(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| RetroError::Json {
                source: e,
                context: format!("{}:{}", path.display(), index + 1),
            })
        })
        .collect()
}
