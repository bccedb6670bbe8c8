//! Weather refresh engine for Nimbus
//!
//! Periodically locates the device, fetches current weather and the
//! reverse-geocoded place, caches the last good result and reports how stale
//! the displayed data is when updates fail or the network is unavailable.

pub mod types;
pub mod cache;
pub mod clock;
pub mod connectivity;
pub mod geocode;
pub mod location;
pub mod pipeline;
pub mod provider;
pub mod scheduler;
pub mod staleness;

pub use types::*;
pub use cache::{CacheError, CachedUpdate, KeyValueStore, MemoryStore, SqliteStore, WeatherCache};
pub use clock::{Clock, SystemClock};
pub use connectivity::{ConnectivityProbe, ManualConnectivity, TcpConnectivity};
pub use geocode::PlaceSource;
pub use location::{FixedLocation, IpLocation, LocationSource};
pub use pipeline::{FetchError, FetchPipeline, FetchedUpdate};
pub use provider::{OpenWeatherClient, WeatherSource};
pub use scheduler::{
    DisplayState, SchedulerConfig, SchedulerError, TickPhase, UpdateScheduler, UpdateState,
};
pub use staleness::{classify, classify_streak, StalenessBasis, StatusMessage};

pub use tokio_util::sync::CancellationToken;
