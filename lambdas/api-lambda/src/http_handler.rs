use aws_core_utils::{
    dynamodb_utils, stages, AppError, ClientOptions, Context, HandlerError, HandlerOptions, Reply,
};
use serde_json::{json, Map, Value};

const DEFAULT_TABLE_NAME: &str = "Orders";

/// Options this function ships with; anything in the options file wins.
pub(crate) fn default_options() -> HandlerOptions {
    let mut options = HandlerOptions::default();
    options.api.use_lambda_proxy = Some(true);
    options.api.default_headers = json!({
        "Content-Type": "application/json",
        "Access-Control-Allow-Origin": "*"
    })
    .as_object()
    .cloned();
    options.standard.dynamodb_options = Some(ClientOptions {
        max_retries: Some(2),
        ..Default::default()
    });
    options.standard.custom = json!({ "tableName": DEFAULT_TABLE_NAME }).as_object().cloned();
    options
}

fn order_id(event: &Value) -> Result<String, AppError> {
    event
        .get("pathParameters")
        .and_then(|params| params.get("orderId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("Missing orderId path parameter"))
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

/// GET /orders/{orderId}
pub(crate) async fn get_order(event: Value, ctx: Context) -> Result<Reply, HandlerError> {
    let method = event.get("httpMethod").and_then(Value::as_str).unwrap_or("GET");
    if method != "GET" {
        return Err(AppError::bad_request(format!("Method {} not allowed", method)).into());
    }

    let order_id = order_id(&event)?;
    let client = ctx
        .dynamodb_client()
        .ok_or_else(|| AppError::internal("DynamoDB client is not configured"))?;
    let table = table_name(&ctx);

    let mut key = Map::new();
    key.insert("orderId".to_string(), Value::String(order_id.clone()));

    match dynamodb_utils::get_item(&client, &table, &key).await? {
        Some(item) => {
            tracing::info!("Found order {} in {}", order_id, table);
            Ok(Reply::new(item))
        }
        None => Err(AppError::not_found(format!("Order {} not found", order_id)).into()),
    }
}
