//! Standardized errors and the translation of arbitrary failures into them.

use std::error::Error as StdError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::contexts::Context;

/// The boxed error user handlers return; identical to the Lambda runtime's.
pub type HandlerError = lambda_runtime::Error;

/// HTTP statuses a standardized error may carry. Anything else becomes 500.
pub const SUPPORTED_HTTP_STATUSES: [u16; 11] = [400, 401, 403, 404, 408, 409, 429, 500, 502, 503, 504];

/// Code given to failures that are not already standardized.
pub const GENERIC_ERROR_CODE: &str = "Error";

pub fn is_supported_http_status(status: u16) -> bool {
    SUPPORTED_HTTP_STATUSES.contains(&status)
}

/// A normalized, HTTP-mappable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{code} ({http_status}): {message}")]
pub struct AppError {
    pub message: String,
    pub code: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    /// Build an error with the given status, coercing unsupported statuses to 500.
    pub fn new(http_status: u16, message: impl Into<String>, code: impl Into<String>) -> Self {
        let http_status = if is_supported_http_status(http_status) { http_status } else { 500 };
        Self {
            message: message.into(),
            code: code.into(),
            http_status,
            cause: None,
            audit_ref: None,
            request_id: None,
        }
    }

    pub fn with_status(http_status: u16, message: impl Into<String>) -> Self {
        let code = default_code_for(http_status);
        Self::new(http_status, message, code)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message, "BadRequest")
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message, "Unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message, "Forbidden")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message, "NotFound")
    }

    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::new(408, message, "RequestTimeout")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(409, message, "Conflict")
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(429, message, "TooManyRequests")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message, "InternalServerError")
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(502, message, "BadGateway")
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message, "ServiceUnavailable")
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(504, message, "GatewayTimeout")
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_audit_ref(mut self, audit_ref: impl Into<String>) -> Self {
        self.audit_ref = Some(audit_ref.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_bad_request(&self) -> bool {
        self.http_status == 400
    }

    /// The default response body: the error itself, serialized.
    pub fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "message": self.message,
                "code": self.code,
                "httpStatus": self.http_status,
            })
        })
    }
}

fn default_code_for(http_status: u16) -> &'static str {
    match http_status {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        408 => "RequestTimeout",
        409 => "Conflict",
        429 => "TooManyRequests",
        502 => "BadGateway",
        503 => "ServiceUnavailable",
        504 => "GatewayTimeout",
        _ => "InternalServerError",
    }
}

/// Client-fault errors: standardized errors carrying a 400.
pub fn is_bad_request(err: &(dyn StdError + Send + Sync + 'static)) -> bool {
    err.downcast_ref::<AppError>()
        .map_or(false, AppError::is_bad_request)
}

fn cause_chain(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    (!causes.is_empty()).then(|| causes.join(": "))
}

/// Convert any failure into an [`AppError`].
///
/// Standardized errors pass through with optional message/code overrides;
/// everything else becomes a 500 with code `"Error"`.
pub fn to_app_error(
    err: &(dyn StdError + Send + Sync + 'static),
    message: Option<&str>,
    code: Option<&str>,
) -> AppError {
    let mut app_error = match err.downcast_ref::<AppError>() {
        Some(existing) => {
            let mut existing = existing.clone();
            // Deserialized or hand-built errors may carry any status
            if !is_supported_http_status(existing.http_status) {
                existing.http_status = 500;
            }
            existing
        }
        None => {
            let mut generic = AppError::new(500, err.to_string(), GENERIC_ERROR_CODE);
            generic.cause = cause_chain(err);
            generic
        }
    };
    if let Some(message) = message {
        app_error.message = message.to_string();
    }
    if let Some(code) = code {
        app_error.code = code.to_string();
    }
    app_error
}

/// Fill in the request id and audit ref of `translated`.
///
/// Sources, in order: the translated error, the original error, the context,
/// the runtime metadata. An audit ref that still cannot be found is minted.
pub fn resolve_identifiers(
    mut translated: AppError,
    original: &(dyn StdError + Send + Sync + 'static),
    ctx: &Context,
) -> AppError {
    let original = original.downcast_ref::<AppError>();
    let runtime = ctx.runtime.as_ref();

    translated.request_id = translated
        .request_id
        .take()
        .or_else(|| original.and_then(|e| e.request_id.clone()))
        .or_else(|| ctx.request_id.clone())
        .or_else(|| runtime.map(|r| r.request_id.clone()).filter(|id| !id.is_empty()));

    translated.audit_ref = translated
        .audit_ref
        .take()
        .or_else(|| original.and_then(|e| e.audit_ref.clone()))
        .or_else(|| ctx.audit_ref.clone())
        .or_else(|| runtime.and_then(|r| r.xray_trace_id.clone()))
        .or_else(|| Some(uuid::Uuid::new_v4().to_string()));

    translated
}

/// Custom error body shaping.
pub type ErrorShaper = Arc<dyn Fn(&AppError, &Context) -> Result<Value, HandlerError> + Send + Sync>;

/// Produce the error body, preferring `shaper` but falling back to
/// [`AppError::to_body`] if it fails or panics.
pub fn shape_error_body(app_error: &AppError, ctx: &Context, shaper: Option<&ErrorShaper>) -> Value {
    let Some(shaper) = shaper else {
        return app_error.to_body();
    };
    match catch_unwind(AssertUnwindSafe(|| shaper(app_error, ctx))) {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            tracing::error!("Custom error response shaping failed - using default: {}", e);
            app_error.to_body()
        }
        Err(_) => {
            tracing::error!("Custom error response shaping panicked - using default");
            app_error.to_body()
        }
    }
}

/// Translate `err` into a standardized error plus its response body. Never fails.
pub fn translate_error(
    err: &(dyn StdError + Send + Sync + 'static),
    ctx: &Context,
    shaper: Option<&ErrorShaper>,
) -> (AppError, Value) {
    let app_error = resolve_identifiers(to_app_error(err, None, None), err, ctx);
    let body = shape_error_body(&app_error, ctx, shaper);
    (app_error, body)
}
