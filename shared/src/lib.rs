pub mod api_lambdas;
pub mod arns;
pub mod clients;
pub mod config;
pub mod contexts;
pub mod dynamodb_utils;
pub mod errors;
pub mod kms_utils;
pub mod lambda_utils;
pub mod layered;
pub mod logging;
pub mod regions;
pub mod stages;

pub use api_lambdas::{
    generate_handler_function, ApiConfig, ApiHandler, HandlerConfig, HandlerOptions, HandlerSettings,
    Reply,
};
pub use clients::{ClientOptions, ServiceRegistry};
pub use contexts::{
    configure_standard_context, ConfigLayers, Context, ContextError, RuntimeInfo, Source,
    StandardConfig, StandardSettings,
};
pub use errors::{AppError, HandlerError};
