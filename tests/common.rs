//! Common test harness utilities for integration tests.
//!
//! This module provides helpers for:
//! - Building payload stores on a manual clock
//! - Scripted extensions whose authorizers answer in a fixed way
//! - Building an admission pipeline over those extensions

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use broker_core::auth::{
    AdmissionPipeline, AuthorizerCall, AuthorizerProvider, AuthorizerProviderInput,
    ExtensionDescriptor, ExtensionError, ExtensionKey, ExtensionRegistry, PublishAuthorizer,
    PublishAuthorizerInput, PublishVerdictHandle, SubscribeAuthorizerInput,
    SubscribeVerdictHandle, SubscriptionAuthorizer, TimeoutFallback, VerdictError, VerdictHandle,
    VerdictKind,
};
use broker_core::config::{AuthConfig, PayloadConfig};
use broker_core::mqtt::{ClientContext, ProtocolVersion};
use broker_core::persistence::{LocalPayloadStore, MemoryPayloadBackend, PayloadStore};
use broker_core::time::{Clock, ManualClock};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Payload settings small enough to exercise sharding and eviction.
pub fn payload_config() -> PayloadConfig {
    PayloadConfig {
        bucket_count: 8,
        cleanup_threads: 2,
        cleanup_schedule_ms: 50,
        cleanup_delay_ms: 2_000,
        ..PayloadConfig::default()
    }
}

pub fn manual_store(
    config: &PayloadConfig,
    backend: Arc<dyn LocalPayloadStore>,
) -> (Arc<PayloadStore<ManualClock>>, ManualClock) {
    let clock = ManualClock::new();
    let store = Arc::new(PayloadStore::new(config, backend, clock.clone()));
    (store, clock)
}

pub fn memory_store() -> (Arc<PayloadStore<ManualClock>>, Arc<MemoryPayloadBackend>, ManualClock) {
    let backend = Arc::new(MemoryPayloadBackend::new());
    let (store, clock) = manual_store(&payload_config(), backend.clone());
    (store, backend, clock)
}

pub fn client(id: &str) -> ClientContext {
    ClientContext::new(id, ProtocolVersion::V5)
}

/// What a scripted authorizer writes to its verdict handle.
#[derive(Debug, Clone)]
pub enum Answer {
    Succeed,
    Fail,
    FailWithReason(&'static str),
    Disconnect,
    DisconnectWithReason(&'static str),
    Continue,
    Nothing,
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    Now(Answer),
    Later {
        answer: Answer,
        delay: Duration,
        timeout: Duration,
        fallback: TimeoutFallback,
    },
    Panic,
    Error,
}

pub fn apply<K: VerdictKind>(answer: &Answer, handle: &VerdictHandle<K>) -> Result<(), VerdictError> {
    match answer {
        Answer::Succeed => handle.succeed(),
        Answer::Fail => handle.fail(),
        Answer::FailWithReason(reason) => handle.fail_with_reason(K::DEFAULT_FAIL_CODE, *reason),
        Answer::Disconnect => handle.disconnect(),
        Answer::DisconnectWithReason(reason) => handle.disconnect_with_reason(
            broker_core::mqtt::DisconnectReasonCode::NotAuthorized,
            *reason,
        ),
        Answer::Continue => handle.continue_to_next(),
        Answer::Nothing => Ok(()),
    }
}

/// Authorizer that answers PUBLISH and SUBSCRIBE the same scripted way and
/// records when it was called.
pub struct ScriptedAuthorizer {
    name: String,
    behaviour: Behaviour,
    calls: AtomicUsize,
    journal: Arc<Mutex<Vec<String>>>,
    late_results: Arc<Mutex<Vec<Result<(), VerdictError>>>>,
}

impl ScriptedAuthorizer {
    fn run<K: VerdictKind>(&self, handle: &VerdictHandle<K>) -> Result<AuthorizerCall, ExtensionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push(self.name.clone());
        match &self.behaviour {
            Behaviour::Now(answer) => {
                apply(answer, handle)?;
                Ok(AuthorizerCall::Done)
            }
            Behaviour::Later {
                answer,
                delay,
                timeout,
                fallback,
            } => {
                let handle = handle.clone();
                let answer = answer.clone();
                let delay = *delay;
                let late_results = self.late_results.clone();
                Ok(AuthorizerCall::deferred(Some(*timeout), *fallback, async move {
                    tokio::time::sleep(delay).await;
                    let result = apply(&answer, &handle);
                    late_results.lock().push(result);
                    Ok(())
                }))
            }
            Behaviour::Panic => panic!("scripted authorizer {} panicked", self.name),
            Behaviour::Error => Err(ExtensionError::Failed(format!("{} is broken", self.name))),
        }
    }
}

impl PublishAuthorizer for ScriptedAuthorizer {
    fn authorize_publish(
        &self,
        _input: &PublishAuthorizerInput,
        output: &PublishVerdictHandle,
    ) -> Result<AuthorizerCall, ExtensionError> {
        self.run(output)
    }
}

impl SubscriptionAuthorizer for ScriptedAuthorizer {
    fn authorize_subscribe(
        &self,
        _input: &SubscribeAuthorizerInput,
        output: &SubscribeVerdictHandle,
    ) -> Result<AuthorizerCall, ExtensionError> {
        self.run(output)
    }
}

pub struct ScriptedProvider {
    authorizer: Option<Arc<ScriptedAuthorizer>>,
}

impl AuthorizerProvider for ScriptedProvider {
    fn publish_authorizer(
        &self,
        _client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn PublishAuthorizer>> {
        self.authorizer
            .clone()
            .map(|a| a as Arc<dyn PublishAuthorizer>)
    }

    fn subscription_authorizer(
        &self,
        _client: &AuthorizerProviderInput,
    ) -> Option<Arc<dyn SubscriptionAuthorizer>> {
        self.authorizer
            .clone()
            .map(|a| a as Arc<dyn SubscriptionAuthorizer>)
    }
}

/// A registry of scripted extensions plus the handles tests inspect.
pub struct Extensions {
    pub registry: Arc<ExtensionRegistry>,
    pub journal: Arc<Mutex<Vec<String>>>,
    pub late_results: Arc<Mutex<Vec<Result<(), VerdictError>>>>,
    authorizers: Vec<Arc<ScriptedAuthorizer>>,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            registry: Arc::new(ExtensionRegistry::new()),
            journal: Arc::new(Mutex::new(Vec::new())),
            late_results: Arc::new(Mutex::new(Vec::new())),
            authorizers: Vec::new(),
        }
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension whose authorizer behaves as `behaviour`.
    pub fn with(mut self, name: &str, priority: i32, behaviour: Behaviour) -> Self {
        let authorizer = Arc::new(ScriptedAuthorizer {
            name: name.to_string(),
            behaviour,
            calls: AtomicUsize::new(0),
            journal: self.journal.clone(),
            late_results: self.late_results.clone(),
        });
        self.registry.register(
            descriptor(name, priority),
            Arc::new(ScriptedProvider {
                authorizer: Some(authorizer.clone()),
            }),
        );
        self.authorizers.push(authorizer);
        self
    }

    /// Register an extension that builds no authorizer for any client.
    pub fn without_authorizer(self, name: &str, priority: i32) -> Self {
        self.registry.register(
            descriptor(name, priority),
            Arc::new(ScriptedProvider { authorizer: None }),
        );
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.authorizers
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn order(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn pipeline<C: Clock>(
        &self,
        config: &AuthConfig,
        store: Arc<PayloadStore<C>>,
    ) -> AdmissionPipeline<C> {
        AdmissionPipeline::new(config, self.registry.clone(), store)
    }
}

pub fn descriptor(name: &str, priority: i32) -> ExtensionDescriptor {
    ExtensionDescriptor {
        key: ExtensionKey::new(name, 1),
        priority,
    }
}
