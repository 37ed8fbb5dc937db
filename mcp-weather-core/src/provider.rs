use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::{
    CandidateSet, Location, SearchQuery, WeatherError, WeatherSnapshot, config::ProviderConfig,
};

pub mod open_meteo;

pub use open_meteo::OpenMeteoProvider;

/// Turns a place name into ranked candidate locations.
#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    /// One outbound call. Zero matches is `Ok` with an empty set.
    async fn search(&self, query: &SearchQuery) -> Result<CandidateSet, WeatherError>;

    /// Cheap reachability probe used before the server announces readiness.
    async fn health_check(&self) -> Result<(), WeatherError> {
        Ok(())
    }
}

/// Retrieves current conditions plus a 24-hour forecast, always in metric.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    async fn fetch(&self, location: &Location) -> Result<WeatherSnapshot, WeatherError>;

    async fn health_check(&self) -> Result<(), WeatherError> {
        Ok(())
    }
}

/// Construct the upstream provider from config.
pub fn provider_from_config(config: &ProviderConfig) -> Result<Arc<OpenMeteoProvider>, WeatherError> {
    OpenMeteoProvider::new(config.clone()).map(Arc::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_default_config_builds() {
        let provider = provider_from_config(&ProviderConfig::default());
        assert!(provider.is_ok());
    }

    #[tokio::test]
    async fn default_health_checks_pass() {
        #[derive(Debug)]
        struct Silent;

        #[async_trait]
        impl Geocoder for Silent {
            async fn search(&self, _query: &SearchQuery) -> Result<CandidateSet, WeatherError> {
                Ok(CandidateSet::default())
            }
        }

        assert!(Geocoder::health_check(&Silent).await.is_ok());
    }
}
