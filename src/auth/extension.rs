//! Interfaces through which extensions take part in authorization.

use super::verdict::{PublishVerdictHandle, SubscribeVerdictHandle, VerdictError};
use crate::mqtt::{ProtocolVersion, Qos};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error(transparent)]
    Verdict(#[from] VerdictError),
    #[error("{0}")]
    Failed(String),
}

/// Identifies one loaded extension. A reloaded extension gets a new
/// `loader_identity` and therefore fresh authorizer instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionKey {
    pub extension_id: String,
    pub loader_identity: u64,
}

impl ExtensionKey {
    pub fn new(extension_id: impl Into<String>, loader_identity: u64) -> Self {
        Self {
            extension_id: extension_id.into(),
            loader_identity,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    pub key: ExtensionKey,
    /// Higher runs first.
    pub priority: i32,
}

/// What to do when an asynchronous authorizer misses its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutFallback {
    /// Fail the authorization with the default reason code.
    Failure,
    /// Keep whatever disposition the verdict had and move on.
    Success,
}

pub type CompletionFuture = Pin<Box<dyn Future<Output = Result<(), ExtensionError>> + Send>>;

pub struct AsyncCall {
    /// Falls back to the configured default when absent.
    pub timeout: Option<Duration>,
    pub fallback: TimeoutFallback,
    pub completion: CompletionFuture,
}

/// Returned by an authorizer to say whether it answered inline.
pub enum AuthorizerCall {
    Done,
    Async(AsyncCall),
}

impl AuthorizerCall {
    /// The authorizer answers later through a cloned handle; `completion`
    /// finishes when it has.
    pub fn deferred<F>(timeout: Option<Duration>, fallback: TimeoutFallback, completion: F) -> Self
    where
        F: Future<Output = Result<(), ExtensionError>> + Send + 'static,
    {
        AuthorizerCall::Async(AsyncCall {
            timeout,
            fallback,
            completion: Box::pin(completion),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizerProviderInput {
    pub client_id: String,
    pub username: Option<String>,
    pub protocol: ProtocolVersion,
}

#[derive(Debug, Clone)]
pub struct PublishAuthorizerInput {
    pub client_id: String,
    pub username: Option<String>,
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub payload: Bytes,
    /// The publish is a Will carried in CONNECT.
    pub will: bool,
}

#[derive(Debug, Clone)]
pub struct SubscribeAuthorizerInput {
    pub client_id: String,
    pub username: Option<String>,
    pub topic_filter: String,
    pub qos: Qos,
}

pub trait PublishAuthorizer: Send + Sync {
    fn authorize_publish(
        &self,
        input: &PublishAuthorizerInput,
        output: &PublishVerdictHandle,
    ) -> Result<AuthorizerCall, ExtensionError>;
}

pub trait SubscriptionAuthorizer: Send + Sync {
    fn authorize_subscribe(
        &self,
        input: &SubscribeAuthorizerInput,
        output: &SubscribeVerdictHandle,
    ) -> Result<AuthorizerCall, ExtensionError>;
}

/// Builds per-client authorizers. Returning `None` means the extension has
/// no opinion on that kind of operation for this client.
pub trait AuthorizerProvider: Send + Sync {
    fn publish_authorizer(
        &self,
        _client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn PublishAuthorizer>> {
        None
    }

    fn subscription_authorizer(
        &self,
        _client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn SubscriptionAuthorizer>> {
        None
    }
}

#[derive(Clone)]
pub struct RegisteredProvider {
    pub descriptor: ExtensionDescriptor,
    pub provider: Arc<dyn AuthorizerProvider>,
}

/// The running extension set as seen by authorization.
pub trait ExtensionRuntime: Send + Sync {
    fn authorizer_providers(&self) -> Vec<RegisteredProvider>;
}

/// Order parties by priority, highest first; ties go by extension id.
pub fn sort_by_priority(providers: &mut [RegisteredProvider]) {
    providers.sort_by(|a, b| {
        b.descriptor
            .priority
            .cmp(&a.descriptor.priority)
            .then_with(|| a.descriptor.key.cmp(&b.descriptor.key))
    });
}

/// In-process extension runtime keyed by extension.
#[derive(Default)]
pub struct ExtensionRegistry {
    providers: RwLock<HashMap<ExtensionKey, RegisteredProvider>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the provider for `descriptor.key`.
    pub fn register(&self, descriptor: ExtensionDescriptor, provider: Arc<dyn AuthorizerProvider>) {
        let key = descriptor.key.clone();
        self.providers.write().insert(
            key,
            RegisteredProvider {
                descriptor,
                provider,
            },
        );
    }

    pub fn unregister(&self, key: &ExtensionKey) -> bool {
        self.providers.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExtensionRuntime for ExtensionRegistry {
    fn authorizer_providers(&self) -> Vec<RegisteredProvider> {
        let mut providers: Vec<_> = self.providers.read().values().cloned().collect();
        sort_by_priority(&mut providers);
        providers
    }
}

/// Authorizers built for one client, reused for every operation until the
/// client disconnects.
#[derive(Default)]
pub struct ClientAuthorizers {
    publish: Mutex<HashMap<ExtensionKey, Option<Arc<dyn PublishAuthorizer>>>>,
    subscribe: Mutex<HashMap<ExtensionKey, Option<Arc<dyn SubscriptionAuthorizer>>>>,
}

impl ClientAuthorizers {
    pub fn publish_authorizer(
        &self,
        registered: &RegisteredProvider,
        client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn PublishAuthorizer>> {
        let key = &registered.descriptor.key;
        if let Some(cached) = self.publish.lock().get(key) {
            return cached.clone();
        }
        let built = registered.provider.publish_authorizer(client);
        self.publish
            .lock()
            .entry(key.clone())
            .or_insert(built)
            .clone()
    }

    pub fn subscription_authorizer(
        &self,
        registered: &RegisteredProvider,
        client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn SubscriptionAuthorizer>> {
        let key = &registered.descriptor.key;
        if let Some(cached) = self.subscribe.lock().get(key) {
            return cached.clone();
        }
        let built = registered.provider.subscription_authorizer(client);
        self.subscribe
            .lock()
            .entry(key.clone())
            .or_insert(built)
            .clone()
    }

    /// Drop everything built by a stopped extension.
    pub fn forget_extension(&self, key: &ExtensionKey) {
        self.publish.lock().remove(key);
        self.subscribe.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.publish.lock().len() + self.subscribe.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
