use std::path::PathBuf;
use std::sync::Arc;

use aws_core_utils::{
    config, generate_handler_function, logging, HandlerConfig, RuntimeInfo, ServiceRegistry, Source,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init_tracing();

    // Clients are cached per region in the registry across invocations
    let registry = ServiceRegistry::load().await;

    let options_path = std::env::var("HANDLER_OPTIONS_FILE").ok().map(PathBuf::from);
    let options = config::load_handler_options(options_path.as_deref())?;

    let handler = Arc::new(generate_handler_function(
        registry,
        HandlerConfig {
            options: Some(Source::Template(options)),
            legacy: Some(http_handler::default_options()),
            ..Default::default()
        },
        http_handler::get_order,
    ));

    run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = Arc::clone(&handler);
        async move {
            let runtime = RuntimeInfo::from(&event.context);
            handler.invoke(event.payload, runtime).await
        }
    }))
    .await
}
