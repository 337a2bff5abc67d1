//! Deployment stage resolution and stage-qualified naming.
//!
//! A stage (dev, qa, prod, ...) is resolved, in order, from: a stage already on
//! the context, the stage environment variable, a custom hook, the alias of the
//! invoked function, the suffix of the event's source stream or table name, the
//! API gateway request stage and finally a configured default.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arns;
use crate::contexts::Context;

pub const DEFAULT_ENV_STAGE_NAME: &str = "STAGE";
pub const DEFAULT_SEPARATOR: &str = "_";

/// Case conversion applied when injecting a stage into, or extracting it from, a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Case {
    Upper,
    Lower,
    #[default]
    AsIs,
}

impl Case {
    pub fn apply(self, value: &str) -> String {
        match self {
            Case::Upper => value.to_uppercase(),
            Case::Lower => value.to_lowercase(),
            Case::AsIs => value.to_string(),
        }
    }
}

/// Plain-data stage handling rules. Unset fields fall back to the defaults
/// exposed by the accessor methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHandlingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_stage_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_name_stage_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name_stage_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inject_in_case: Option<Case>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_in_case: Option<Case>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_stage_from_stream_name: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract_stage_from_resource_name: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_stage: Option<String>,
}

impl StageHandlingOptions {
    /// The built-in defaults, used as the lowest configuration layer.
    pub fn defaults() -> Self {
        Self {
            env_stage_name: Some(DEFAULT_ENV_STAGE_NAME.to_string()),
            stream_name_stage_separator: Some(DEFAULT_SEPARATOR.to_string()),
            resource_name_stage_separator: Some(DEFAULT_SEPARATOR.to_string()),
            inject_in_case: Some(Case::Upper),
            extract_in_case: Some(Case::Lower),
            extract_stage_from_stream_name: Some(true),
            extract_stage_from_resource_name: Some(true),
            default_stage: None,
        }
    }

    pub fn env_stage_name(&self) -> &str {
        self.env_stage_name.as_deref().unwrap_or(DEFAULT_ENV_STAGE_NAME)
    }

    pub fn stream_name_stage_separator(&self) -> &str {
        self.stream_name_stage_separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
    }

    pub fn resource_name_stage_separator(&self) -> &str {
        self.resource_name_stage_separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
    }

    pub fn inject_in_case(&self) -> Case {
        self.inject_in_case.unwrap_or(Case::Upper)
    }

    pub fn extract_in_case(&self) -> Case {
        self.extract_in_case.unwrap_or(Case::Lower)
    }

    pub fn extract_stage_from_stream_name(&self) -> bool {
        self.extract_stage_from_stream_name.unwrap_or(true)
    }

    pub fn extract_stage_from_resource_name(&self) -> bool {
        self.extract_stage_from_resource_name.unwrap_or(true)
    }
}

pub type CustomToStage = Arc<dyn Fn(&Context) -> Option<String> + Send + Sync>;
pub type ConvertAliasToStage = Arc<dyn Fn(&str, &Context) -> Option<String> + Send + Sync>;

/// Function-valued stage settings. These can only come from code, never from
/// a JSON options document.
#[derive(Clone, Default)]
pub struct StageHooks {
    pub custom_to_stage: Option<CustomToStage>,
    pub convert_alias_to_stage: Option<ConvertAliasToStage>,
}

impl StageHooks {
    /// Fill any hook missing here from `lower`.
    pub fn or(self, lower: &StageHooks) -> Self {
        Self {
            custom_to_stage: self.custom_to_stage.or_else(|| lower.custom_to_stage.clone()),
            convert_alias_to_stage: self
                .convert_alias_to_stage
                .or_else(|| lower.convert_alias_to_stage.clone()),
        }
    }
}

impl fmt::Debug for StageHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHooks")
            .field("custom_to_stage", &self.custom_to_stage.is_some())
            .field("convert_alias_to_stage", &self.convert_alias_to_stage.is_some())
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Resolve the stage for `ctx` without modifying it.
pub fn resolve_stage(ctx: &Context, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(stage) = non_empty(ctx.stage.clone()) {
        return Some(stage);
    }

    let opts = ctx.config.stage_handling.clone().unwrap_or_default();
    let case = opts.extract_in_case();

    if let Some(stage) = non_empty(lookup(opts.env_stage_name())) {
        return Some(case.apply(&stage));
    }

    if let Some(custom_to_stage) = &ctx.stage_hooks.custom_to_stage {
        if let Some(stage) = non_empty(custom_to_stage(ctx)) {
            return Some(stage);
        }
    }

    if let Some(alias) = ctx.runtime.as_ref().and_then(|runtime| runtime.alias()) {
        let stage = match &ctx.stage_hooks.convert_alias_to_stage {
            Some(convert) => convert(&alias, ctx),
            None => Some(case.apply(&alias)),
        };
        if let Some(stage) = non_empty(stage) {
            return Some(stage);
        }
    }

    if let Some(stage) = ctx.event.as_ref().and_then(|event| stage_from_event_source(event, &opts)) {
        return Some(stage);
    }

    if let Some(stage) = ctx.event.as_ref().and_then(api_gateway_stage) {
        return Some(case.apply(&stage));
    }

    non_empty(opts.default_stage.clone()).map(|stage| case.apply(&stage))
}

/// Stage suffix of the Kinesis stream or DynamoDB table behind the first record.
fn stage_from_event_source(event: &Value, opts: &StageHandlingOptions) -> Option<String> {
    let arn = event
        .get("Records")?
        .as_array()?
        .first()?
        .get("eventSourceARN")?
        .as_str()?;
    let name = arns::arn_resources(arn).resource;

    match arns::service_of(arn) {
        "kinesis" if opts.extract_stage_from_stream_name() => extract_stage_from_qualified_name(
            &name,
            opts.stream_name_stage_separator(),
            opts.extract_in_case(),
        ),
        "dynamodb" if opts.extract_stage_from_resource_name() => extract_stage_from_qualified_name(
            &name,
            opts.resource_name_stage_separator(),
            opts.extract_in_case(),
        ),
        _ => None,
    }
}

fn api_gateway_stage(event: &Value) -> Option<String> {
    event
        .get("requestContext")?
        .get("stage")?
        .as_str()
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Append `stage` to `name` using the stream separator and inject case.
pub fn to_stage_qualified_stream_name(name: &str, stage: &str, opts: &StageHandlingOptions) -> String {
    qualify(name, stage, opts.stream_name_stage_separator(), opts.inject_in_case())
}

/// Append `stage` to `name` using the resource separator and inject case.
pub fn to_stage_qualified_resource_name(name: &str, stage: &str, opts: &StageHandlingOptions) -> String {
    qualify(name, stage, opts.resource_name_stage_separator(), opts.inject_in_case())
}

fn qualify(name: &str, stage: &str, separator: &str, case: Case) -> String {
    if stage.is_empty() {
        return name.to_string();
    }
    let suffix = format!("{}{}", separator, case.apply(stage));
    if name.ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Split a qualified name on its last separator into `(name, stage)`.
pub fn extract_name_and_stage<'a>(qualified: &'a str, separator: &str) -> (&'a str, Option<&'a str>) {
    if separator.is_empty() {
        return (qualified, None);
    }
    match qualified.rsplit_once(separator) {
        Some((name, stage)) if !stage.is_empty() => (name, Some(stage)),
        _ => (qualified, None),
    }
}

pub fn extract_stage_from_qualified_name(qualified: &str, separator: &str, case: Case) -> Option<String> {
    extract_name_and_stage(qualified, separator)
        .1
        .map(|stage| case.apply(stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::RuntimeInfo;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn ctx_with(event: Option<Value>, function_arn: Option<&str>) -> Context {
        let mut ctx = Context::default();
        ctx.event = event;
        ctx.runtime = function_arn.map(|arn| RuntimeInfo {
            request_id: "req-1".to_string(),
            invoked_function_arn: arn.to_string(),
            ..Default::default()
        });
        ctx
    }

    #[test]
    fn existing_stage_wins() {
        let mut ctx = ctx_with(None, None);
        ctx.stage = Some("prod".to_string());
        let stage = resolve_stage(&ctx, |_| Some("QA".to_string()));
        assert_eq!(stage.as_deref(), Some("prod"));
    }

    #[test]
    fn env_stage_is_lowercased() {
        let ctx = ctx_with(None, None);
        let stage = resolve_stage(&ctx, |name| (name == "STAGE").then(|| "QA".to_string()));
        assert_eq!(stage.as_deref(), Some("qa"));
    }

    #[test]
    fn custom_env_stage_name() {
        let mut ctx = ctx_with(None, None);
        ctx.config.stage_handling = Some(StageHandlingOptions {
            env_stage_name: Some("DEPLOY_ENV".to_string()),
            extract_in_case: Some(Case::AsIs),
            ..Default::default()
        });
        let stage = resolve_stage(&ctx, |name| (name == "DEPLOY_ENV").then(|| "Staging".to_string()));
        assert_eq!(stage.as_deref(), Some("Staging"));
    }

    #[test]
    fn custom_hook_beats_alias() {
        let mut ctx = ctx_with(None, Some("arn:aws:lambda:eu-west-1:1:function:f:QA"));
        ctx.stage_hooks.custom_to_stage = Some(Arc::new(|_: &Context| Some("sandbox".to_string())));
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("sandbox"));
    }

    #[test]
    fn stage_from_alias() {
        let ctx = ctx_with(None, Some("arn:aws:lambda:eu-west-1:1:function:f:QA"));
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("qa"));

        let mut ctx = ctx_with(None, Some("arn:aws:lambda:eu-west-1:1:function:f:live"));
        ctx.stage_hooks.convert_alias_to_stage =
            Some(Arc::new(|alias: &str, _: &Context| (alias == "live").then(|| "prod".to_string())));
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("prod"));
    }

    #[test]
    fn version_qualifiers_are_not_stages() {
        let event = json!({"requestContext": {"stage": "prod"}});
        let ctx = ctx_with(Some(event.clone()), Some("arn:aws:lambda:eu-west-1:1:function:orders:7"));
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("prod"));

        let ctx = ctx_with(Some(event), Some("arn:aws:lambda:eu-west-1:1:function:orders:$LATEST"));
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("prod"));
    }

    #[test]
    fn stage_from_kinesis_stream_name() {
        let event = json!({"Records": [{
            "eventSource": "aws:kinesis",
            "eventSourceARN": "arn:aws:kinesis:us-west-2:1:stream/Orders_DEV"
        }]});
        let ctx = ctx_with(Some(event), None);
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("dev"));
    }

    #[test]
    fn stream_extraction_can_be_disabled() {
        let event = json!({"Records": [{
            "eventSourceARN": "arn:aws:kinesis:us-west-2:1:stream/Orders_DEV"
        }]});
        let mut ctx = ctx_with(Some(event), None);
        ctx.config.stage_handling = Some(StageHandlingOptions {
            extract_stage_from_stream_name: Some(false),
            default_stage: Some("fallback".to_string()),
            ..Default::default()
        });
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("fallback"));
    }

    #[test]
    fn stage_from_dynamodb_table_name() {
        let event = json!({"Records": [{
            "eventSourceARN": "arn:aws:dynamodb:us-east-1:1:table/Orders_PROD/stream/2016-11-16T20:42:48.104"
        }]});
        let ctx = ctx_with(Some(event), None);
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("prod"));
    }

    #[test]
    fn stage_from_api_gateway_request() {
        let event = json!({"requestContext": {"stage": "Beta"}});
        let ctx = ctx_with(Some(event), None);
        assert_eq!(resolve_stage(&ctx, no_env).as_deref(), Some("beta"));
    }

    #[test]
    fn nothing_resolves_without_default() {
        let ctx = ctx_with(Some(json!({"body": "{}"})), None);
        assert_eq!(resolve_stage(&ctx, no_env), None);
    }

    #[test]
    fn qualifies_names() {
        let opts = StageHandlingOptions::defaults();
        assert_eq!(to_stage_qualified_stream_name("Orders", "dev", &opts), "Orders_DEV");
        assert_eq!(to_stage_qualified_stream_name("Orders_DEV", "dev", &opts), "Orders_DEV");
        assert_eq!(to_stage_qualified_resource_name("Orders", "", &opts), "Orders");

        let dashed = StageHandlingOptions {
            resource_name_stage_separator: Some("-".to_string()),
            inject_in_case: Some(Case::Lower),
            ..Default::default()
        };
        assert_eq!(to_stage_qualified_resource_name("orders-table", "QA", &dashed), "orders-table-qa");
    }

    #[test]
    fn splits_qualified_names_on_last_separator() {
        assert_eq!(extract_name_and_stage("my_orders_QA", "_"), ("my_orders", Some("QA")));
        assert_eq!(extract_name_and_stage("orders", "_"), ("orders", None));
        assert_eq!(extract_name_and_stage("orders_", "_"), ("orders_", None));
        assert_eq!(
            extract_stage_from_qualified_name("Orders_PROD", "_", Case::Lower).as_deref(),
            Some("prod")
        );
    }
}
