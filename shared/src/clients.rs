//! Per-process SDK client caching.
//!
//! Each service kind gets a single cached slot holding the most recently built
//! client together with the configuration it was built for. A request with a
//! different region or retry count replaces the slot (last writer wins).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use aws_config::{retry::RetryConfig, Region, SdkConfig};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_kinesis::Client as KinesisClient;
use aws_sdk_kms::Client as KmsClient;
use aws_sdk_lambda::Client as LambdaClient;
use serde::{Deserialize, Serialize};

use crate::contexts::{Context, ContextError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Kinesis,
    DynamoDb,
    Lambda,
    Kms,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Kinesis => "Kinesis",
            ServiceKind::DynamoDb => "DynamoDB",
            ServiceKind::Lambda => "Lambda",
            ServiceKind::Kms => "KMS",
        };
        f.write_str(name)
    }
}

/// Constructor options for one service's client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    /// Overrides the context's region for this client only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// The configuration a cached client was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub region: String,
    pub max_retries: Option<u32>,
}

/// A client plus the key it was built for.
pub struct Cached<C> {
    pub key: ClientKey,
    pub client: Arc<C>,
}

impl<C> Clone for Cached<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            client: Arc::clone(&self.client),
        }
    }
}

impl<C> fmt::Debug for Cached<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached").field("key", &self.key).finish_non_exhaustive()
    }
}

/// An SDK client the registry knows how to build.
pub trait ServiceClient: Send + Sync + 'static {
    const KIND: ServiceKind;

    fn build(base: &SdkConfig, key: &ClientKey) -> Self;
}

/// `max_retries = n` allows `n + 1` attempts in total.
fn retry_config(key: &ClientKey) -> Option<RetryConfig> {
    key.max_retries
        .map(|retries| RetryConfig::standard().with_max_attempts(retries.saturating_add(1)))
}

impl ServiceClient for KinesisClient {
    const KIND: ServiceKind = ServiceKind::Kinesis;

    fn build(base: &SdkConfig, key: &ClientKey) -> Self {
        let mut config = aws_sdk_kinesis::config::Builder::from(base).region(Region::new(key.region.clone()));
        if let Some(retry) = retry_config(key) {
            config = config.retry_config(retry);
        }
        KinesisClient::from_conf(config.build())
    }
}

impl ServiceClient for DynamoClient {
    const KIND: ServiceKind = ServiceKind::DynamoDb;

    fn build(base: &SdkConfig, key: &ClientKey) -> Self {
        let mut config = aws_sdk_dynamodb::config::Builder::from(base).region(Region::new(key.region.clone()));
        if let Some(retry) = retry_config(key) {
            config = config.retry_config(retry);
        }
        DynamoClient::from_conf(config.build())
    }
}

impl ServiceClient for LambdaClient {
    const KIND: ServiceKind = ServiceKind::Lambda;

    fn build(base: &SdkConfig, key: &ClientKey) -> Self {
        let mut config = aws_sdk_lambda::config::Builder::from(base).region(Region::new(key.region.clone()));
        if let Some(retry) = retry_config(key) {
            config = config.retry_config(retry);
        }
        LambdaClient::from_conf(config.build())
    }
}

impl ServiceClient for KmsClient {
    const KIND: ServiceKind = ServiceKind::Kms;

    fn build(base: &SdkConfig, key: &ClientKey) -> Self {
        let mut config = aws_sdk_kms::config::Builder::from(base).region(Region::new(key.region.clone()));
        if let Some(retry) = retry_config(key) {
            config = config.retry_config(retry);
        }
        KmsClient::from_conf(config.build())
    }
}

/// Single-slot cache for one service kind.
pub struct ClientCache<C> {
    slot: Mutex<Option<Cached<C>>>,
}

impl<C> Default for ClientCache<C> {
    fn default() -> Self {
        Self { slot: Mutex::new(None) }
    }
}

impl<C: ServiceClient> ClientCache<C> {
    /// Return a client compatible with `key`.
    ///
    /// The context-local instance is preferred, then the process-wide slot;
    /// otherwise a new client is built and stored in both.
    pub fn get_or_create(&self, local: &mut Option<Cached<C>>, base: &SdkConfig, key: ClientKey) -> Arc<C> {
        if let Some(cached) = local.as_ref().filter(|cached| cached.key == key) {
            return Arc::clone(&cached.client);
        }

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let reusable = slot.as_ref().filter(|cached| cached.key == key).cloned();
        let cached = match reusable {
            Some(cached) => {
                tracing::debug!("Reusing cached {} client for region {}", C::KIND, key.region);
                cached
            }
            None => {
                match slot.as_ref() {
                    Some(previous) => tracing::info!(
                        "Replacing cached {} client ({:?}) with one for {:?}",
                        C::KIND,
                        previous.key,
                        key
                    ),
                    None => tracing::info!("Creating {} client for region {}", C::KIND, key.region),
                }
                let fresh = Cached {
                    client: Arc::new(C::build(base, &key)),
                    key,
                };
                *slot = Some(fresh.clone());
                fresh
            }
        };

        let client = Arc::clone(&cached.client);
        *local = Some(cached);
        client
    }

    pub fn cached(&self) -> Option<Cached<C>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Process-wide owner of the base SDK configuration and every client cache.
pub struct ServiceRegistry {
    base: SdkConfig,
    kinesis: ClientCache<KinesisClient>,
    dynamodb: ClientCache<DynamoClient>,
    lambda: ClientCache<LambdaClient>,
    kms: ClientCache<KmsClient>,
}

impl ServiceRegistry {
    pub fn new(base: SdkConfig) -> Arc<Self> {
        Arc::new(Self {
            base,
            kinesis: ClientCache::default(),
            dynamodb: ClientCache::default(),
            lambda: ClientCache::default(),
            kms: ClientCache::default(),
        })
    }

    /// Load the base configuration from the environment once at startup.
    pub async fn load() -> Arc<Self> {
        let config = aws_config::load_from_env().await;
        Self::new(config)
    }

    pub fn base_config(&self) -> &SdkConfig {
        &self.base
    }

    fn key_for(&self, ctx: &Context, options: Option<&ClientOptions>) -> Result<ClientKey, ContextError> {
        let region = options
            .and_then(|o| o.region.clone())
            .or_else(|| ctx.region.clone())
            .or_else(|| self.base.region().map(|r| r.to_string()))
            .ok_or(ContextError::MissingRegion)?;
        Ok(ClientKey {
            region,
            max_retries: options.and_then(|o| o.max_retries),
        })
    }

    pub fn kinesis(&self, ctx: &mut Context) -> Result<Arc<KinesisClient>, ContextError> {
        let key = self.key_for(ctx, ctx.config.kinesis_options.as_ref())?;
        Ok(self.kinesis.get_or_create(&mut ctx.kinesis, &self.base, key))
    }

    pub fn dynamodb(&self, ctx: &mut Context) -> Result<Arc<DynamoClient>, ContextError> {
        let key = self.key_for(ctx, ctx.config.dynamodb_options.as_ref())?;
        Ok(self.dynamodb.get_or_create(&mut ctx.dynamodb, &self.base, key))
    }

    pub fn lambda(&self, ctx: &mut Context) -> Result<Arc<LambdaClient>, ContextError> {
        let key = self.key_for(ctx, ctx.config.lambda_options.as_ref())?;
        Ok(self.lambda.get_or_create(&mut ctx.lambda, &self.base, key))
    }

    pub fn kms(&self, ctx: &mut Context) -> Result<Arc<KmsClient>, ContextError> {
        let key = self.key_for(ctx, ctx.config.kms_options.as_ref())?;
        Ok(self.kms.get_or_create(&mut ctx.kms, &self.base, key))
    }

    pub fn kinesis_cache(&self) -> &ClientCache<KinesisClient> {
        &self.kinesis
    }

    pub fn dynamodb_cache(&self) -> &ClientCache<DynamoClient> {
        &self.dynamodb
    }
}
