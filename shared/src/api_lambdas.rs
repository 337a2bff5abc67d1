//! Handler wrapper for Lambdas behind an API gateway.
//!
//! [`generate_handler_function`] wraps a user function so that every
//! invocation gets a freshly composed [`Context`], the outcome is logged, and
//! exactly one response (or error) is produced, shaped either as the raw value
//! or as a Lambda-Proxy envelope.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::clients::ServiceRegistry;
use crate::contexts::{
    configure_event_and_runtime, configure_standard_context_with, produce_or_default, ConfigLayers, Context,
    RuntimeInfo, Source, StandardConfig, StandardSettings,
};
use crate::errors::{self, ErrorShaper, HandlerError};
use crate::layered;
use crate::logging::LogLevel;
use crate::regions;
use crate::stages::StageHooks;

/// Environment variable lookup used while configuring contexts.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Handler-level plain data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_lambda_proxy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_headers: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_request_response_at_log_level: Option<LogLevel>,
}

impl ApiConfig {
    pub fn use_lambda_proxy(&self) -> bool {
        self.use_lambda_proxy.unwrap_or(false)
    }

    pub fn default_headers(&self) -> Map<String, Value> {
        self.default_headers.clone().unwrap_or_default()
    }
}

/// Everything a handler can be configured with, as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerOptions {
    #[serde(flatten)]
    pub standard: StandardConfig,
    #[serde(flatten)]
    pub api: ApiConfig,
}

/// Runs just before the final outcome is returned. Failures are logged and ignored.
pub type OutcomeHook = Arc<dyn Fn(&Context, &Value) -> Result<(), HandlerError> + Send + Sync>;

/// Handler options plus the function-valued settings code may supply.
#[derive(Clone, Default)]
pub struct HandlerSettings {
    pub options: HandlerOptions,
    pub stage_hooks: StageHooks,
    pub to_error_response: Option<ErrorShaper>,
    pub before_success: Option<OutcomeHook>,
    pub before_failure: Option<OutcomeHook>,
}

impl std::fmt::Debug for HandlerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSettings")
            .field("options", &self.options)
            .field("stage_hooks", &self.stage_hooks)
            .field("to_error_response", &self.to_error_response.is_some())
            .field("before_success", &self.before_success.is_some())
            .field("before_failure", &self.before_failure.is_some())
            .finish()
    }
}

/// Where a handler's context, settings and options come from.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    pub context: Option<Source<Context>>,
    pub settings: Option<Source<HandlerSettings>>,
    pub options: Option<Source<HandlerOptions>>,
    /// Lowest precedence options, below `options`.
    pub legacy: Option<HandlerOptions>,
}

/// What a wrapped function resolves with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub status_code: Option<u16>,
    pub headers: Map<String, Value>,
    pub body: Value,
}

impl Reply {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Reply::new(body)
    }
}

/// Error returned to the runtime in non-proxy mode; its message is the JSON
/// of the standardized error.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FailedInvocation(pub String);

/// Build a Lambda-Proxy envelope. `headers` win over `default_headers`; a
/// string body is passed through, anything else is JSON-stringified.
pub fn to_lambda_proxy_response(
    status_code: u16,
    headers: &Map<String, Value>,
    default_headers: &Map<String, Value>,
    body: &Value,
) -> Value {
    let mut merged = headers.clone();
    layered::merge_maps_under(&mut merged, default_headers);

    let body = match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut response = Map::new();
    response.insert("statusCode".to_string(), json!(status_code));
    if !merged.is_empty() {
        response.insert("headers".to_string(), Value::Object(merged));
    }
    response.insert("body".to_string(), Value::String(body));
    Value::Object(response)
}

fn run_hook(hook: Option<&OutcomeHook>, ctx: &Context, outcome: &Value, name: &str) {
    let Some(hook) = hook else {
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| hook(ctx, outcome))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => ctx.log(LogLevel::Error, &format!("{} hook failed - ignoring: {}", name, e)),
        Err(_) => ctx.log(LogLevel::Error, &format!("{} hook panicked - ignoring", name)),
    }
}

fn log_exchange(ctx: &Context, label: &str, value: &Value) {
    if let Some(level) = ctx.api.log_request_response_at_log_level {
        ctx.log(level, &format!("{}: {}", label, value));
    }
}

/// Shape a successful reply.
pub fn succeed(ctx: &Context, settings: Option<&HandlerSettings>, reply: Reply) -> Value {
    let response = if ctx.api.use_lambda_proxy() {
        to_lambda_proxy_response(
            reply.status_code.unwrap_or(200),
            &reply.headers,
            &ctx.api.default_headers(),
            &reply.body,
        )
    } else {
        reply.body
    };

    log_exchange(ctx, "Response", &response);
    run_hook(settings.and_then(|s| s.before_success.as_ref()), ctx, &response, "Pre-success");
    response
}

/// Shape a failure. In proxy mode the failure becomes an `Ok` envelope
/// carrying the error's status; otherwise an `Err` whose message is the JSON
/// of the standardized error.
pub fn fail(ctx: &Context, settings: Option<&HandlerSettings>, err: HandlerError) -> Result<Value, HandlerError> {
    if errors::is_bad_request(err.as_ref()) {
        ctx.log(LogLevel::Warn, &format!("Handler rejected a bad request: {}", err));
    } else {
        ctx.log(LogLevel::Error, &format!("Handler failed: {} ({:?})", err, err));
    }

    let shaper = settings.and_then(|s| s.to_error_response.as_ref());
    let (app_error, body) = errors::translate_error(err.as_ref(), ctx, shaper);

    if ctx.api.use_lambda_proxy() {
        let response =
            to_lambda_proxy_response(app_error.http_status, &Map::new(), &ctx.api.default_headers(), &body);
        log_exchange(ctx, "Error response", &response);
        run_hook(settings.and_then(|s| s.before_failure.as_ref()), ctx, &response, "Pre-failure");
        Ok(response)
    } else {
        log_exchange(ctx, "Error response", &body);
        run_hook(settings.and_then(|s| s.before_failure.as_ref()), ctx, &body, "Pre-failure");
        Err(Box::new(FailedInvocation(body.to_string())))
    }
}

/// A wrapped user function; see [`generate_handler_function`].
pub struct ApiHandler<F> {
    registry: Arc<ServiceRegistry>,
    config: HandlerConfig,
    env: EnvLookup,
    function: F,
}

/// Wrap `function` so each invocation is configured, logged and shaped.
pub fn generate_handler_function<F, Fut, R>(
    registry: Arc<ServiceRegistry>,
    config: HandlerConfig,
    function: F,
) -> ApiHandler<F>
where
    F: Fn(Value, Context) -> Fut,
    Fut: Future<Output = Result<R, HandlerError>>,
    R: Into<Reply>,
{
    ApiHandler {
        registry,
        config,
        env: Arc::new(regions::process_env),
        function,
    }
}

impl<F, Fut, R> ApiHandler<F>
where
    F: Fn(Value, Context) -> Fut,
    Fut: Future<Output = Result<R, HandlerError>>,
    R: Into<Reply>,
{
    /// Replace the process environment as the source of region and stage variables.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Handle one invocation. Always yields exactly one outcome.
    pub async fn invoke(&self, event: Value, runtime: RuntimeInfo) -> Result<Value, HandlerError> {
        // Fallback context for failures during configuration
        let mut ctx = Context::default();
        configure_event_and_runtime(&mut ctx, Some(event.clone()), Some(runtime.clone()));
        let mut settings = None;

        let prepared = catch_unwind(AssertUnwindSafe(|| {
            self.prepare(&mut ctx, &mut settings, event.clone(), runtime)
        }))
        .unwrap_or_else(|_| Err("Context configuration panicked".into()));

        if let Err(err) = prepared {
            return fail(&ctx, settings.as_ref(), err);
        }

        log_exchange(&ctx, "Request", &event);

        let call = AssertUnwindSafe(async { (self.function)(event, ctx.clone()).await }).catch_unwind();
        match call.await {
            Ok(Ok(reply)) => Ok(succeed(&ctx, settings.as_ref(), reply.into())),
            Ok(Err(err)) => fail(&ctx, settings.as_ref(), err),
            Err(_) => fail(&ctx, settings.as_ref(), "Handler function panicked".into()),
        }
    }

    fn resolve_api(
        &self,
        existing: Option<&ApiConfig>,
        settings: Option<&HandlerSettings>,
        options: Option<&HandlerOptions>,
    ) -> Result<ApiConfig, serde_json::Error> {
        let base = ApiConfig::default();
        let layers: Vec<&ApiConfig> = [
            existing,
            settings.map(|s| &s.options.api),
            options.map(|o| &o.api),
            self.config.legacy.as_ref().map(|l| &l.api),
            Some(&base),
        ]
        .into_iter()
        .flatten()
        .collect();
        layered::resolve_as(&layers)
    }

    fn prepare(
        &self,
        ctx: &mut Context,
        settings_out: &mut Option<HandlerSettings>,
        event: Value,
        runtime: RuntimeInfo,
    ) -> Result<(), HandlerError> {
        // The fallback context tracks the api layers produced so far, so a
        // failing generator still yields a response in the configured shape
        ctx.api = self.resolve_api(None, None, None)?;
        *settings_out = self.config.settings.as_ref().map(Source::produce);
        let settings = settings_out.as_ref();
        ctx.api = self.resolve_api(None, settings, None)?;
        let options = self.config.options.as_ref().map(Source::produce);
        ctx.api = self.resolve_api(None, settings, options.as_ref())?;
        let legacy = self.config.legacy.as_ref();

        let mut produced = produce_or_default(self.config.context.as_ref());
        configure_event_and_runtime(&mut produced, Some(event), Some(runtime));
        produced.api = self.resolve_api(Some(&produced.api), settings, options.as_ref())?;
        *ctx = produced;

        let standard_settings = settings.map(|s| StandardSettings {
            config: s.options.standard.clone(),
            stage_hooks: s.stage_hooks.clone(),
        });
        let layers = ConfigLayers {
            settings: standard_settings.as_ref(),
            options: options.as_ref().map(|o| &o.standard),
            legacy: legacy.map(|l| &l.standard),
        };
        configure_standard_context_with(ctx, &self.registry, layers, None, None, &*self.env)?;
        Ok(())
    }
}
