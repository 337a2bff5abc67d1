use std::sync::Arc;

use aws_core_utils::{
    configure_standard_context, dynamodb_utils,
    logging::{self, LogLevel},
    stages, ClientOptions, ConfigLayers, Context, RuntimeInfo, ServiceRegistry, StandardConfig,
};
use aws_lambda_events::event::kinesis::{KinesisEvent, KinesisEventRecord};
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::{json, Map, Value};

const DEFAULT_TABLE_NAME: &str = "Orders";

#[tokio::main]
async fn main() -> Result<(), Error> {
    logging::init_tracing();

    let registry = ServiceRegistry::load().await;

    run(service_fn(move |event: LambdaEvent<Value>| {
        let registry = Arc::clone(&registry);
        async move { function_handler(&registry, event).await }
    }))
    .await
}

fn stream_options() -> StandardConfig {
    StandardConfig {
        dynamodb_options: Some(ClientOptions {
            max_retries: Some(3),
            ..Default::default()
        }),
        custom: json!({ "tableName": DEFAULT_TABLE_NAME }).as_object().cloned(),
        ..StandardConfig::defaults()
    }
}

async fn function_handler(registry: &ServiceRegistry, event: LambdaEvent<Value>) -> Result<Value, Error> {
    let runtime = RuntimeInfo::from(&event.context);
    let options = stream_options();

    // Stage comes from the stream name suffix when nothing more specific is set
    let mut ctx = Context::default();
    configure_standard_context(
        &mut ctx,
        registry,
        ConfigLayers {
            options: Some(&options),
            ..Default::default()
        },
        Some(event.payload.clone()),
        Some(runtime),
    )?;

    let kinesis_event: KinesisEvent = serde_json::from_value(event.payload)?;
    ctx.log(
        LogLevel::Info,
        &format!(
            "Kinesis event received with {} records (stage: {:?})",
            kinesis_event.records.len(),
            ctx.stage
        ),
    );

    let client = ctx
        .dynamodb_client()
        .ok_or("DynamoDB client is not configured")?;
    let table = table_name(&ctx);

    let mut found = 0;
    let mut failed = 0;
    for record in &kinesis_event.records {
        match process_record(&client, &table, record).await {
            Ok(true) => found += 1,
            Ok(false) => {}
            Err(e) => {
                failed += 1;
                tracing::error!(
                    "Failed to process record {:?}: {}",
                    record.kinesis.sequence_number,
                    e
                );
            }
        }
    }

    tracing::info!(
        "Processed {} records: {} found, {} failed",
        kinesis_event.records.len(),
        found,
        failed
    );
    Ok(json!({
        "records": kinesis_event.records.len(),
        "found": found,
        "failed": failed
    }))
}

fn table_name(ctx: &Context) -> String {
    let base = ctx
        .custom("tableName")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_TABLE_NAME);
    match &ctx.stage {
        Some(stage) => stages::to_stage_qualified_resource_name(base, stage, &ctx.stage_handling()),
        None => base.to_string(),
    }
}

/// Key of the order a record refers to, if its payload names one.
fn order_key(data: &[u8]) -> Result<Option<Map<String, Value>>, serde_json::Error> {
    let payload: Value = serde_json::from_slice(data)?;
    Ok(payload
        .get("orderId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| {
            let mut key = Map::new();
            key.insert("orderId".to_string(), Value::String(id.to_string()));
            key
        }))
}

async fn process_record(
    client: &DynamoClient,
    table_name: &str,
    record: &KinesisEventRecord,
) -> Result<bool, Error> {
    let Some(key) = order_key(&record.kinesis.data)? else {
        tracing::warn!(
            "Skipping record {:?} without orderId",
            record.kinesis.sequence_number
        );
        return Ok(false);
    };

    let item = dynamodb_utils::get_item(client, table_name, &key).await?;
    tracing::info!(
        "Record {:?} refers to {} (found: {})",
        record.kinesis.sequence_number,
        serde_json::Value::Object(key),
        item.is_some()
    );
    Ok(item.is_some())
}
