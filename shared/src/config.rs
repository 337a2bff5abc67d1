//! Loading handler options documents.
//!
//! A JSON file supplies the options; environment variables prefixed with
//! `AWS_CORE_UTILS_` are layered over it, with nested keys separated by `__`
//! (e.g. `AWS_CORE_UTILS_stageHandling__defaultStage=dev`).

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use thiserror::Error;

use crate::api_lambdas::HandlerOptions;

pub const ENV_PREFIX: &str = "AWS_CORE_UTILS_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load handler options: {0}")]
    Load(#[from] figment::Error),
}

pub fn handler_options_figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(HandlerOptions::default()));
    if let Some(path) = path {
        figment = figment.merge(Json::file(path));
    }
    // `split` rebuilds the provider, so case preservation must come after it
    figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(false))
}

pub fn load_handler_options(path: Option<&Path>) -> Result<HandlerOptions, ConfigError> {
    Ok(handler_options_figment(path).extract()?)
}

pub fn handler_options_from_json(json: &str) -> Result<HandlerOptions, ConfigError> {
    Ok(Figment::from(Json::string(json)).extract()?)
}
