//! Per-invocation context composition.
//!
//! A [`Context`] starts out empty (or as a copy of a template), then has its
//! configuration resolved from settings and options in a single layered pass,
//! receives the inbound event and runtime metadata, and finally gets its
//! region, stage and SDK clients.

use std::sync::Arc;

use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_kinesis::Client as KinesisClient;
use aws_sdk_kms::Client as KmsClient;
use aws_sdk_lambda::Client as LambdaClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::api_lambdas::ApiConfig;
use crate::arns;
use crate::clients::{Cached, ClientOptions, ServiceRegistry};
use crate::layered;
use crate::logging::{log_at, LogLevel, LoggingOptions};
use crate::regions;
use crate::stages::{self, StageHandlingOptions, StageHooks};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to resolve an AWS region - set AWS_REGION or configure a client region")]
    MissingRegion,
    #[error("Failed to resolve a stage - set the stage environment variable or a default stage")]
    MissingStage,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

/// Plain-data configuration carried by every context. Loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_handling: Option<StageHandlingOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinesis_options: Option<ClientOptions>,
    #[serde(rename = "dynamoDBDocClientOptions", skip_serializing_if = "Option::is_none")]
    pub dynamodb_options: Option<ClientOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda_options: Option<ClientOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_options: Option<ClientOptions>,
}

impl StandardConfig {
    /// Built-in defaults; always the lowest layer.
    pub fn defaults() -> Self {
        Self {
            logging: Some(LoggingOptions {
                log_level: Some(LogLevel::Info),
            }),
            stage_handling: Some(StageHandlingOptions::defaults()),
            ..Default::default()
        }
    }
}

/// Settings may carry functions as well as plain data.
#[derive(Debug, Clone, Default)]
pub struct StandardSettings {
    pub config: StandardConfig,
    pub stage_hooks: StageHooks,
}

/// The configuration sources below the context itself, highest precedence first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLayers<'a> {
    pub settings: Option<&'a StandardSettings>,
    pub options: Option<&'a StandardConfig>,
    /// Lowest-precedence options kept for callers still passing shared opts.
    pub legacy: Option<&'a StandardConfig>,
}

/// Runtime metadata for the current invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub request_id: String,
    pub invoked_function_arn: String,
    pub function_name: String,
    pub function_version: String,
    /// Deadline in epoch milliseconds.
    pub deadline_ms: u64,
    pub xray_trace_id: Option<String>,
}

impl RuntimeInfo {
    /// Alias the function was invoked with. Version qualifiers are not aliases.
    pub fn alias(&self) -> Option<String> {
        arns::arn_resources(&self.invoked_function_arn)
            .alias()
            .map(str::to_string)
    }

    pub fn remaining_time_in_millis(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis();
        u64::try_from(now).map_or(0, |now| self.deadline_ms.saturating_sub(now))
    }
}

impl From<&lambda_runtime::Context> for RuntimeInfo {
    fn from(ctx: &lambda_runtime::Context) -> Self {
        Self {
            request_id: ctx.request_id.clone(),
            invoked_function_arn: ctx.invoked_function_arn.clone(),
            function_name: ctx.env_config.function_name.clone(),
            function_version: ctx.env_config.version.clone(),
            deadline_ms: ctx.deadline,
            xray_trace_id: ctx.xray_trace_id.clone(),
        }
    }
}

/// Per-invocation bag of configuration and live SDK clients.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub region: Option<String>,
    pub stage: Option<String>,
    /// Caller-supplied identifiers that take precedence over runtime metadata
    /// when errors are translated.
    pub request_id: Option<String>,
    pub audit_ref: Option<String>,
    pub config: StandardConfig,
    pub api: ApiConfig,
    pub stage_hooks: StageHooks,
    pub kinesis: Option<Cached<KinesisClient>>,
    pub dynamodb: Option<Cached<DynamoClient>>,
    pub lambda: Option<Cached<LambdaClient>>,
    pub kms: Option<Cached<KmsClient>>,
    pub event: Option<Value>,
    pub runtime: Option<RuntimeInfo>,
}

impl Context {
    pub fn log_level(&self) -> LogLevel {
        self.config
            .logging
            .as_ref()
            .and_then(|logging| logging.log_level)
            .unwrap_or_default()
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level <= self.log_level()
    }

    /// Log through `tracing`, gated by this context's log level.
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.is_enabled(level) {
            log_at(level, message);
        }
    }

    pub fn stage_handling(&self) -> StageHandlingOptions {
        self.config
            .stage_handling
            .clone()
            .unwrap_or_else(StageHandlingOptions::defaults)
    }

    pub fn custom(&self, key: &str) -> Option<&Value> {
        self.config.custom.as_ref().and_then(|custom| custom.get(key))
    }

    pub fn kinesis_client(&self) -> Option<Arc<KinesisClient>> {
        self.kinesis.as_ref().map(|c| Arc::clone(&c.client))
    }

    pub fn dynamodb_client(&self) -> Option<Arc<DynamoClient>> {
        self.dynamodb.as_ref().map(|c| Arc::clone(&c.client))
    }

    pub fn lambda_client(&self) -> Option<Arc<LambdaClient>> {
        self.lambda.as_ref().map(|c| Arc::clone(&c.client))
    }

    pub fn kms_client(&self) -> Option<Arc<KmsClient>> {
        self.kms.as_ref().map(|c| Arc::clone(&c.client))
    }
}

/// Either a generator or a template to copy.
#[derive(Clone)]
pub enum Source<T> {
    Generate(Arc<dyn Fn() -> T + Send + Sync>),
    Template(T),
}

impl<T: Clone> Source<T> {
    pub fn generate(f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Source::Generate(Arc::new(f))
    }

    /// Call the generator or copy the template. The template itself is never handed out.
    pub fn produce(&self) -> T {
        match self {
            Source::Generate(generate) => generate(),
            Source::Template(template) => template.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Generate(_) => f.write_str("Source::Generate"),
            Source::Template(_) => f.write_str("Source::Template"),
        }
    }
}

pub fn produce_or_default<T: Clone + Default>(source: Option<&Source<T>>) -> T {
    source.map(Source::produce).unwrap_or_default()
}

/// Resolve the context's plain configuration in one pass: existing context
/// values, then settings, options, legacy options and the built-in defaults.
pub fn configure_config(ctx: &mut Context, layers: ConfigLayers<'_>) -> Result<(), ContextError> {
    let defaults = StandardConfig::defaults();
    let ordered: Vec<&StandardConfig> = [
        Some(&ctx.config),
        layers.settings.map(|s| &s.config),
        layers.options,
        layers.legacy,
        Some(&defaults),
    ]
    .into_iter()
    .flatten()
    .collect();

    let resolved = layered::resolve_as(&ordered)?;
    ctx.config = resolved;

    if let Some(settings) = layers.settings {
        ctx.stage_hooks = std::mem::take(&mut ctx.stage_hooks).or(&settings.stage_hooks);
    }
    Ok(())
}

/// Merge extra custom settings under those already on the context.
pub fn configure_custom_settings(ctx: &mut Context, custom: &Map<String, Value>) {
    let existing = ctx.config.custom.get_or_insert_with(Map::new);
    layered::merge_maps_under(existing, custom);
}

/// Attach the inbound event and runtime metadata unless already present.
pub fn configure_event_and_runtime(ctx: &mut Context, event: Option<Value>, runtime: Option<RuntimeInfo>) {
    if ctx.event.is_none() {
        ctx.event = event;
    }
    if ctx.runtime.is_none() {
        ctx.runtime = runtime;
    }
}

pub fn configure_region(
    ctx: &mut Context,
    lookup: impl Fn(&str) -> Option<String>,
    fail_fast: bool,
) -> Result<(), ContextError> {
    if ctx.region.is_none() {
        let arn = ctx.runtime.as_ref().map(|r| r.invoked_function_arn.as_str());
        ctx.region = regions::resolve_region(lookup, arn);
    }
    match &ctx.region {
        None if fail_fast => Err(ContextError::MissingRegion),
        None => {
            tracing::warn!("No AWS region could be resolved for this context");
            Ok(())
        }
        Some(_) => Ok(()),
    }
}

pub fn configure_stage(
    ctx: &mut Context,
    lookup: impl Fn(&str) -> Option<String>,
    fail_fast: bool,
) -> Result<(), ContextError> {
    ctx.stage = stages::resolve_stage(ctx, lookup);
    match &ctx.stage {
        None if fail_fast => Err(ContextError::MissingStage),
        None => {
            ctx.log(LogLevel::Warn, "No stage could be resolved for this context");
            Ok(())
        }
        Some(_) => Ok(()),
    }
}

/// Create (or reuse) the clients whose options are configured.
pub fn configure_clients(ctx: &mut Context, registry: &ServiceRegistry) -> Result<(), ContextError> {
    if ctx.config.kinesis_options.is_some() {
        registry.kinesis(ctx)?;
    }
    if ctx.config.dynamodb_options.is_some() {
        registry.dynamodb(ctx)?;
    }
    if ctx.config.lambda_options.is_some() {
        registry.lambda(ctx)?;
    }
    if ctx.config.kms_options.is_some() {
        registry.kms(ctx)?;
    }
    Ok(())
}

/// Fully configure `ctx` for one invocation using the process environment.
pub fn configure_standard_context(
    ctx: &mut Context,
    registry: &ServiceRegistry,
    layers: ConfigLayers<'_>,
    event: Option<Value>,
    runtime: Option<RuntimeInfo>,
) -> Result<(), ContextError> {
    configure_standard_context_with(ctx, registry, layers, event, runtime, &regions::process_env)
}

/// As [`configure_standard_context`], with an explicit environment lookup.
pub fn configure_standard_context_with(
    ctx: &mut Context,
    registry: &ServiceRegistry,
    layers: ConfigLayers<'_>,
    event: Option<Value>,
    runtime: Option<RuntimeInfo>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ContextError> {
    configure_config(ctx, layers)?;
    configure_event_and_runtime(ctx, event, runtime);
    configure_region(ctx, lookup, true)?;
    configure_stage(ctx, lookup, false)?;
    configure_clients(ctx, registry)?;

    ctx.log(
        LogLevel::Debug,
        &format!(
            "Configured context - region: {:?}, stage: {:?}",
            ctx.region, ctx.stage
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::tests::test_registry;
    use crate::stages::Case;
    use serde_json::json;

    fn env(region: Option<&'static str>, stage: Option<&'static str>) -> impl Fn(&str) -> Option<String> {
        move |name| match name {
            "AWS_REGION" => region.map(str::to_string),
            "STAGE" => stage.map(str::to_string),
            _ => None,
        }
    }

    fn runtime() -> RuntimeInfo {
        RuntimeInfo {
            request_id: "req-123".to_string(),
            invoked_function_arn: "arn:aws:lambda:eu-west-1:123456789012:function:orders:QA".to_string(),
            function_name: "orders".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn existing_values_beat_settings_beat_options() {
        let mut ctx = Context::default();
        ctx.config.logging = Some(LoggingOptions { log_level: Some(LogLevel::Trace) });

        let settings = StandardSettings {
            config: StandardConfig {
                logging: Some(LoggingOptions { log_level: Some(LogLevel::Error) }),
                stage_handling: Some(StageHandlingOptions {
                    env_stage_name: Some("DEPLOYMENT".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let options: StandardConfig = serde_json::from_value(json!({
            "stageHandling": {"envStageName": "IGNORED", "defaultStage": "dev"},
            "custom": {"tableName": "Orders"}
        }))
        .unwrap();
        let legacy: StandardConfig = serde_json::from_value(json!({
            "custom": {"tableName": "Legacy", "pageSize": 25}
        }))
        .unwrap();

        configure_config(
            &mut ctx,
            ConfigLayers {
                settings: Some(&settings),
                options: Some(&options),
                legacy: Some(&legacy),
            },
        )
        .unwrap();

        assert_eq!(ctx.log_level(), LogLevel::Trace);
        let stage_handling = ctx.stage_handling();
        assert_eq!(stage_handling.env_stage_name(), "DEPLOYMENT");
        assert_eq!(stage_handling.default_stage.as_deref(), Some("dev"));
        assert_eq!(stage_handling.extract_in_case(), Case::Lower);
        assert_eq!(ctx.custom("tableName"), Some(&json!("Orders")));
        assert_eq!(ctx.custom("pageSize"), Some(&json!(25)));
    }

    #[test]
    fn template_sources_are_copied() {
        let mut template = Context::default();
        template.stage = Some("dev".to_string());
        let source = Source::Template(template);

        let mut produced = source.produce();
        produced.stage = Some("prod".to_string());

        match &source {
            Source::Template(original) => assert_eq!(original.stage.as_deref(), Some("dev")),
            Source::Generate(_) => unreachable!(),
        }
        assert!(produce_or_default::<Context>(None).stage.is_none());
    }

    #[test]
    fn generator_sources_are_called_each_time() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = Source::generate(move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Context {
                request_id: Some(format!("gen-{}", n)),
                ..Default::default()
            }
        });

        assert_eq!(source.produce().request_id.as_deref(), Some("gen-0"));
        assert_eq!(produce_or_default(Some(&source)).request_id.as_deref(), Some("gen-1"));
    }

    #[test]
    fn custom_settings_merge_under_existing() {
        let mut ctx = Context::default();
        configure_custom_settings(&mut ctx, json!({"a": 1}).as_object().unwrap());
        configure_custom_settings(&mut ctx, json!({"a": 2, "b": 3}).as_object().unwrap());
        assert_eq!(ctx.config.custom, Some(json!({"a": 1, "b": 3}).as_object().unwrap().clone()));
    }

    #[test]
    fn event_and_runtime_are_not_overwritten() {
        let mut ctx = Context::default();
        configure_event_and_runtime(&mut ctx, Some(json!({"first": true})), Some(runtime()));
        configure_event_and_runtime(&mut ctx, Some(json!({"second": true})), None);
        assert_eq!(ctx.event, Some(json!({"first": true})));
        assert_eq!(ctx.runtime.as_ref().unwrap().request_id, "req-123");
    }

    #[test]
    fn region_falls_back_to_function_arn_and_fails_fast() {
        let mut ctx = Context::default();
        ctx.runtime = Some(runtime());
        configure_region(&mut ctx, env(None, None), true).unwrap();
        assert_eq!(ctx.region.as_deref(), Some("eu-west-1"));

        let mut bare = Context::default();
        assert!(matches!(
            configure_region(&mut bare, env(None, None), true),
            Err(ContextError::MissingRegion)
        ));
        configure_region(&mut bare, env(None, None), false).unwrap();
    }

    #[test]
    fn stage_is_optional_unless_fail_fast() {
        let mut ctx = Context::default();
        assert!(matches!(
            configure_stage(&mut ctx, env(None, None), true),
            Err(ContextError::MissingStage)
        ));
        configure_stage(&mut ctx, env(None, Some("Prod")), true).unwrap();
        assert_eq!(ctx.stage.as_deref(), Some("prod"));
    }

    #[tokio::test]
    async fn standard_context_is_fully_configured() {
        let registry = test_registry();
        let options: StandardConfig = serde_json::from_value(json!({
            "kinesisOptions": {"maxRetries": 2},
            "dynamoDBDocClientOptions": {}
        }))
        .unwrap();

        let mut ctx = Context::default();
        configure_standard_context_with(
            &mut ctx,
            &registry,
            ConfigLayers { options: Some(&options), ..Default::default() },
            Some(json!({"requestContext": {"stage": "ignored"}})),
            Some(runtime()),
            &env(Some("us-west-2"), None),
        )
        .unwrap();

        assert_eq!(ctx.region.as_deref(), Some("us-west-2"));
        // Alias beats the API gateway stage
        assert_eq!(ctx.stage.as_deref(), Some("qa"));
        assert_eq!(ctx.kinesis.as_ref().unwrap().key.max_retries, Some(2));
        assert!(ctx.dynamodb_client().is_some());
        assert!(ctx.lambda.is_none());
        assert!(ctx.kms.is_none());
    }

    #[test]
    fn log_level_gates_context_logging() {
        let mut ctx = Context::default();
        assert!(ctx.is_enabled(LogLevel::Info));
        assert!(!ctx.is_enabled(LogLevel::Debug));
        ctx.config.logging = Some(LoggingOptions { log_level: Some(LogLevel::Error) });
        assert!(!ctx.is_enabled(LogLevel::Warn));
    }

    #[test]
    fn runtime_alias_and_remaining_time() {
        assert_eq!(runtime().alias().as_deref(), Some("QA"));
        let expired = RuntimeInfo { deadline_ms: 1, ..Default::default() };
        assert_eq!(expired.remaining_time_in_millis(), 0);
    }
}
