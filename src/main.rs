use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{AppError, Config, LocationMode, StalenessMode, UnitSystem};
use nimbus_weather::{
    ConnectivityProbe, DisplayState, FetchPipeline, FixedLocation, IpLocation, LocationSource,
    ManualConnectivity, OpenWeatherClient, SchedulerConfig, SqliteStore, StalenessBasis,
    TcpConnectivity, Units, UpdateScheduler, WeatherCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nimbus_core::init()?;

    if let Err(e) = run().await {
        tracing::error!("Nimbus stopped: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}

async fn run() -> Result<(), AppError> {
    let (config, _) = Config::load_validated()?;

    let mut scheduler = build_scheduler(&config)?;
    let mut updates = scheduler.subscribe();
    print_display(&updates.borrow());

    scheduler
        .start()
        .map_err(|e| AppError::Service(e.to_string()))?;
    tracing::info!("Nimbus started");

    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let display = updates.borrow_and_update().clone();
            print_display(&display);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    scheduler.stop().await;
    drop(scheduler);
    if let Err(e) = printer.await {
        tracing::warn!("Display printer task failed: {}", e);
    }

    Ok(())
}

fn build_scheduler(config: &Config) -> Result<UpdateScheduler, AppError> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = SqliteStore::open(config.cache_db_path())
        .map_err(|e| AppError::Storage(e.to_string()))?;
    let cache = WeatherCache::new(Arc::new(store));

    let api_key = config.provider.effective_api_key().unwrap_or_else(|| {
        tracing::warn!("No OpenWeather API key; live updates will fail");
        String::new()
    });
    let client = Arc::new(
        OpenWeatherClient::new(&config.provider.base_url, api_key, units(config.provider.units))
            .map_err(|e| AppError::Service(e.to_string()))?,
    );

    let pipeline = FetchPipeline::new(location_source(config)?, client.clone(), client)
        .with_timeout(Duration::from_secs(config.schedule.fetch_timeout_secs));

    let schedule = &config.schedule;
    let scheduler_config = SchedulerConfig {
        tick_interval: Duration::from_secs(schedule.tick_interval_secs),
        grace_period: Duration::from_millis(schedule.grace_period_ms),
        cache_timeout: Duration::from_millis(schedule.cache_timeout_ms),
        staleness_basis: match schedule.staleness_basis {
            StalenessMode::Ticks => StalenessBasis::Ticks,
            StalenessMode::WallClock => StalenessBasis::WallClock,
        },
    };

    Ok(UpdateScheduler::new(
        scheduler_config,
        pipeline,
        connectivity_probe(config),
        cache,
    ))
}

fn units(units: UnitSystem) -> Units {
    match units {
        UnitSystem::Imperial => Units::Imperial,
        UnitSystem::Metric => Units::Metric,
        UnitSystem::Standard => Units::Standard,
    }
}

fn location_source(config: &Config) -> Result<Arc<dyn LocationSource>, AppError> {
    let location = &config.location;
    match (location.source, location.latitude, location.longitude) {
        (LocationMode::Fixed, Some(lat), Some(lon)) => Ok(Arc::new(FixedLocation::new(lat, lon))),
        (LocationMode::Fixed, _, _) => Err(nimbus_core::ConfigError::MissingSetting(
            "location.latitude/location.longitude".into(),
        )
        .into()),
        (LocationMode::Ip, _, _) => {
            let source = IpLocation::new(&location.ip_lookup_url)
                .map_err(|e| AppError::Service(e.to_string()))?;
            Ok(Arc::new(source))
        }
    }
}

fn connectivity_probe(config: &Config) -> Arc<dyn ConnectivityProbe> {
    let connectivity = &config.connectivity;
    if connectivity.force_offline {
        return Arc::new(ManualConnectivity::new(true));
    }
    Arc::new(TcpConnectivity::new(
        connectivity.probe_addr.clone(),
        Duration::from_millis(connectivity.probe_timeout_ms),
    ))
}

fn print_display(display: &DisplayState) {
    if display.in_progress {
        println!("Updating...");
        return;
    }

    let place = display
        .place
        .as_ref()
        .map(|p| p.display_name())
        .unwrap_or_else(|| "Unknown location".to_string());

    match &display.weather {
        Some(weather) => println!(
            "{}: {:.0}° {} (feels like {:.0}°) | {}",
            place,
            weather.temperature,
            weather.condition().description(),
            weather.feels_like,
            display.status
        ),
        None => println!("{}: {}", place, display.status),
    }
}
