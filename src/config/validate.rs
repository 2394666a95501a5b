//! Configuration validation.
//!
//! Node-level settings are checked here and fail the whole load. Individual
//! detectors are validated by the detector registry so that one bad detector
//! does not take the node down.

use crate::config::{Config, ModelStoreConfig};
use crate::constants::confidence;
use crate::error::{Error, Result};

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_engine(config)?;
    validate_cache(config)?;
    validate_model_store(config)?;
    validate_cloud(config)?;
    validate_audit(config)?;
    Ok(())
}

fn validation(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn validate_engine(config: &Config) -> Result<()> {
    let engine = &config.engine;

    if !(confidence::MIN..=confidence::MAX).contains(&engine.out_of_domain_threshold) {
        return Err(validation(format!(
            "engine.out_of_domain_threshold must be between {} and {}, got {}",
            confidence::MIN,
            confidence::MAX,
            engine.out_of_domain_threshold
        )));
    }

    if engine.queue_capacity == 0 {
        return Err(validation("engine.queue_capacity must be at least 1"));
    }

    if engine.workers == Some(0) {
        return Err(validation("engine.workers must be at least 1"));
    }

    if engine.aggressive_timeout_ms == 0 {
        return Err(validation("engine.aggressive_timeout_ms must be positive"));
    }

    if config.server.detector_refresh_secs == 0 {
        return Err(validation("server.detector_refresh_secs must be positive"));
    }

    Ok(())
}

fn validate_cache(config: &Config) -> Result<()> {
    if config.cache.capacity == 0 {
        return Err(validation("cache.capacity must be at least 1"));
    }
    if config.cache.fetch_timeout_ms == 0 {
        return Err(validation("cache.fetch_timeout_ms must be positive"));
    }
    Ok(())
}

fn validate_model_store(config: &Config) -> Result<()> {
    if let ModelStoreConfig::Http { base_url, .. } = &config.model_store
        && !(base_url.starts_with("http://") || base_url.starts_with("https://"))
    {
        return Err(validation(format!(
            "model_store.base_url must be an http(s) URL, got '{base_url}'"
        )));
    }
    Ok(())
}

fn validate_cloud(config: &Config) -> Result<()> {
    let cloud = &config.cloud;

    if let Some(endpoint) = &cloud.endpoint
        && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        return Err(validation(format!(
            "cloud.endpoint must be an http(s) URL, got '{endpoint}'"
        )));
    }

    if cloud.request_timeout_ms == 0 {
        return Err(validation("cloud.request_timeout_ms must be positive"));
    }

    Ok(())
}

fn validate_audit(config: &Config) -> Result<()> {
    let p = config.audit.probability;
    if !(0.0..=1.0).contains(&p) {
        return Err(validation(format!(
            "audit.probability must be between 0 and 1, got {p}"
        )));
    }
    Ok(())
}
