//! Runs the registered authorizers for inbound PUBLISH, Will and SUBSCRIBE
//! packets and turns the combined verdict into a protocol action.
//!
//! Parties run one after another on a spawned task in priority order. The
//! caller waits on the barrier, which resolves on the first terminal answer
//! or once every party has had its turn.

use super::barrier::{AuthorizationBarrier, BarrierError};
use super::extension::{
    sort_by_priority, AuthorizerCall, AuthorizerProviderInput, ClientAuthorizers, ExtensionError,
    ExtensionKey, ExtensionRuntime, PublishAuthorizerInput, RegisteredProvider,
    SubscribeAuthorizerInput, TimeoutFallback,
};
use super::verdict::{
    decide, AuthorizationVerdict, Decision, PublishAuthorization, PublishVerdictHandle,
    SubscribeAuthorization, SubscribeVerdictHandle, VerdictHandle, VerdictKind,
};
use crate::config::AuthConfig;
use crate::mqtt::{
    is_dollar_topic, validate_publish_topic, validate_topic_filter, AckReasonCode, ClientContext,
    ConnackReasonCode, DisconnectAction, DisconnectReasonCode, PublishAdmission, PublishPacket,
    Qos, SubackEntry, SubackReasonCode, SubscribeAdmission, SubscribePacket, Subscription,
    WillAdmission, WillPublish,
};
use crate::ops::audit;
use crate::persistence::{PayloadError, PayloadId, PayloadStore};
use crate::time::{Clock, SystemClock};
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const INVALID_TOPIC_REASON: &str = "Sent PUBLISH for an invalid topic";
const DOLLAR_TOPIC_REASON: &str = "Sent PUBLISH for an topic that starts with '$'";
const UNKNOWN_CLIENT: &str = "<unknown>";

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error("authorization task failed: {0}")]
    Dispatch(String),
}

type PartyCall<K> =
    Box<dyn FnOnce(&VerdictHandle<K>) -> Result<AuthorizerCall, ExtensionError> + Send>;

#[derive(Debug, Clone, Copy)]
struct AsyncTimeouts {
    default: Duration,
    max: Duration,
}

impl AsyncTimeouts {
    fn resolve(self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default).min(self.max)
    }
}

pub fn publish_denied_reason(topic: &str, qos: Qos, retain: bool) -> String {
    format!("Not authorized to publish on topic '{topic}' with QoS '{qos}' and retain '{retain}'")
}

pub fn subscribe_denied_reason(topic_filter: &str, qos: Qos) -> String {
    format!("Not authorized to subscribe to topic filter '{topic_filter}' with QoS '{qos}'")
}

pub struct AdmissionPipeline<C: Clock = SystemClock> {
    runtime: Arc<dyn ExtensionRuntime>,
    store: Arc<PayloadStore<C>>,
    config: AuthConfig,
    clients: Mutex<HashMap<String, Arc<ClientAuthorizers>>>,
}

impl<C: Clock> AdmissionPipeline<C> {
    pub fn new(
        config: &AuthConfig,
        runtime: Arc<dyn ExtensionRuntime>,
        store: Arc<PayloadStore<C>>,
    ) -> Self {
        Self {
            runtime,
            store,
            config: config.clone(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<PayloadStore<C>> {
        &self.store
    }

    /// Admit an inbound PUBLISH. On `Accept` the payload has been stored with
    /// one reference, released later through [`Self::message_consumed`].
    pub async fn admit_publish(
        &self,
        client: &ClientContext,
        packet: &PublishPacket,
    ) -> Result<PublishAdmission, AdmissionError> {
        if let Some(reason) = self.topic_refusal(&packet.topic) {
            let action =
                self.disconnect(client, DisconnectReasonCode::TopicNameInvalid, reason.into());
            return Ok(PublishAdmission::Disconnect(action));
        }
        let decision = self
            .authorize_publish(
                client,
                &packet.topic,
                packet.qos,
                packet.retain,
                &packet.payload,
                false,
            )
            .await?;
        match decision {
            Decision::Allow => {
                let payload_id = self.store.add(packet.payload.clone(), 1)?;
                Ok(PublishAdmission::Accept { payload_id })
            }
            Decision::Reject { code, reason } => {
                let reason = reason.unwrap_or_else(|| {
                    publish_denied_reason(&packet.topic, packet.qos, packet.retain)
                });
                audit::emit("publish_rejected", client_label(client), &reason);
                Ok(PublishAdmission::Reject {
                    code,
                    reason: client.protocol.carries_reasons().then_some(reason),
                })
            }
            Decision::Disconnect { code, reason } => {
                let reason = reason.unwrap_or_else(|| {
                    publish_denied_reason(&packet.topic, packet.qos, packet.retain)
                });
                Ok(PublishAdmission::Disconnect(
                    self.disconnect(client, code, reason.into()),
                ))
            }
        }
    }

    /// Admit the Will carried in CONNECT. A refusal rejects the connection.
    pub async fn admit_will(
        &self,
        client: &ClientContext,
        will: &WillPublish,
    ) -> Result<WillAdmission, AdmissionError> {
        if let Some(reason) = self.topic_refusal(&will.topic) {
            let action =
                self.disconnect(client, DisconnectReasonCode::TopicNameInvalid, reason.into());
            return Ok(WillAdmission::Disconnect(action));
        }
        let decision = self
            .authorize_publish(client, &will.topic, will.qos, will.retain, &will.payload, true)
            .await?;
        match decision {
            Decision::Allow => {
                let payload_id = self.store.add(will.payload.clone(), 1)?;
                Ok(WillAdmission::Accept { payload_id })
            }
            Decision::Reject { code, reason } => {
                let reason =
                    reason.unwrap_or_else(|| publish_denied_reason(&will.topic, will.qos, will.retain));
                audit::emit("connect_refused", client_label(client), &reason);
                Ok(WillAdmission::RefuseConnect {
                    code: ConnackReasonCode::from(code),
                    reason: client.protocol.carries_reasons().then_some(reason),
                })
            }
            Decision::Disconnect { code, reason } => {
                let reason =
                    reason.unwrap_or_else(|| publish_denied_reason(&will.topic, will.qos, will.retain));
                Ok(WillAdmission::Disconnect(self.disconnect(client, code, reason.into())))
            }
        }
    }

    /// Admit a SUBSCRIBE. Each subscription is authorized on its own; any
    /// disconnect outcome disconnects the client, the first one in packet
    /// order providing the code and reason.
    pub async fn admit_subscribe(
        &self,
        client: &ClientContext,
        packet: &SubscribePacket,
    ) -> Result<SubscribeAdmission, AdmissionError> {
        let checks = packet
            .subscriptions
            .iter()
            .map(|subscription| self.authorize_subscription(client, subscription));
        let decisions = futures::future::try_join_all(checks).await?;

        let mut entries = Vec::with_capacity(decisions.len());
        for (subscription, decision) in packet.subscriptions.iter().zip(decisions) {
            match decision {
                Decision::Allow => entries.push(SubackEntry {
                    code: SubackReasonCode::granted(subscription.qos),
                    reason: None,
                }),
                Decision::Reject { code, reason } => {
                    let reason = reason.unwrap_or_else(|| {
                        subscribe_denied_reason(&subscription.topic_filter, subscription.qos)
                    });
                    entries.push(SubackEntry {
                        code,
                        reason: client.protocol.carries_reasons().then_some(reason),
                    });
                }
                Decision::Disconnect { code, reason } => {
                    let reason = reason.unwrap_or_else(|| {
                        subscribe_denied_reason(&subscription.topic_filter, subscription.qos)
                    });
                    return Ok(SubscribeAdmission::Disconnect(
                        self.disconnect(client, code, reason.into()),
                    ));
                }
            }
        }
        Ok(SubscribeAdmission::Suback(entries))
    }

    /// Release the reference taken when a PUBLISH or Will was accepted.
    pub fn message_consumed(&self, payload_id: PayloadId) -> Result<i64, PayloadError> {
        self.store.decrement_reference(payload_id)
    }

    /// Forget the authorizers built for `client_id`.
    pub fn client_disconnected(&self, client_id: &str) {
        if self.clients.lock().remove(client_id).is_some() {
            debug!(client_id, "dropped cached authorizers");
        }
    }

    /// Forget every authorizer built by a stopped or reloaded extension.
    pub fn extension_stopped(&self, key: &ExtensionKey) {
        for authorizers in self.clients.lock().values() {
            authorizers.forget_extension(key);
        }
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.lock().len()
    }

    fn topic_refusal(&self, topic: &str) -> Option<&'static str> {
        if validate_publish_topic(topic).is_err() {
            Some(INVALID_TOPIC_REASON)
        } else if !self.config.allow_dollar_topics && is_dollar_topic(topic) {
            Some(DOLLAR_TOPIC_REASON)
        } else {
            None
        }
    }

    fn disconnect(
        &self,
        client: &ClientContext,
        code: DisconnectReasonCode,
        reason: std::borrow::Cow<'_, str>,
    ) -> DisconnectAction {
        audit::emit("client_disconnected", client_label(client), &reason);
        debug!(client_id = client_label(client), ?code, %reason, "disconnecting client");
        DisconnectAction::new(client.protocol, code, Some(reason.into_owned()))
    }

    fn timeouts(&self) -> AsyncTimeouts {
        AsyncTimeouts {
            default: self.config.default_async_timeout(),
            max: self.config.max_async_timeout(),
        }
    }

    fn providers(&self) -> Vec<RegisteredProvider> {
        let mut providers = self.runtime.authorizer_providers();
        sort_by_priority(&mut providers);
        providers
    }

    fn client_authorizers(&self, client_id: &str) -> Arc<ClientAuthorizers> {
        self.clients
            .lock()
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    async fn authorize_publish(
        &self,
        client: &ClientContext,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: &Bytes,
        will: bool,
    ) -> Result<Decision<AckReasonCode>, AdmissionError> {
        let Some(client_id) = client.client_id.as_deref() else {
            return Ok(Decision::Allow);
        };
        let providers = self.providers();
        if providers.is_empty() {
            return Ok(Decision::Allow);
        }
        let authorizers = self.client_authorizers(client_id);
        let client_input = provider_input(client_id, client);
        let input = Arc::new(PublishAuthorizerInput {
            client_id: client_id.to_string(),
            username: client.username.clone(),
            topic: topic.to_string(),
            qos,
            retain,
            payload: payload.clone(),
            will,
        });
        let resolve = move |registered: &RegisteredProvider| -> Option<PartyCall<PublishAuthorization>> {
            let authorizer = authorizers.publish_authorizer(registered, &client_input)?;
            let input = input.clone();
            let call: PartyCall<PublishAuthorization> =
                Box::new(move |handle: &PublishVerdictHandle| {
                    authorizer.authorize_publish(&input, handle)
                });
            Some(call)
        };
        self.run_chain(providers, resolve).await
    }

    async fn authorize_subscription(
        &self,
        client: &ClientContext,
        subscription: &Subscription,
    ) -> Result<Decision<SubackReasonCode>, AdmissionError> {
        if let Err(err) = validate_topic_filter(&subscription.topic_filter) {
            return Ok(Decision::Reject {
                code: SubackReasonCode::TopicFilterInvalid,
                reason: Some(format!(
                    "Invalid topic filter '{}': {err}",
                    subscription.topic_filter
                )),
            });
        }
        let Some(client_id) = client.client_id.as_deref() else {
            return Ok(Decision::Allow);
        };
        let providers = self.providers();
        if providers.is_empty() {
            return Ok(Decision::Allow);
        }
        let authorizers = self.client_authorizers(client_id);
        let client_input = provider_input(client_id, client);
        let input = Arc::new(SubscribeAuthorizerInput {
            client_id: client_id.to_string(),
            username: client.username.clone(),
            topic_filter: subscription.topic_filter.clone(),
            qos: subscription.qos,
        });
        let resolve = move |registered: &RegisteredProvider| -> Option<PartyCall<SubscribeAuthorization>> {
            let authorizer = authorizers.subscription_authorizer(registered, &client_input)?;
            let input = input.clone();
            let call: PartyCall<SubscribeAuthorization> =
                Box::new(move |handle: &SubscribeVerdictHandle| {
                    authorizer.authorize_subscribe(&input, handle)
                });
            Some(call)
        };
        self.run_chain(providers, resolve).await
    }

    async fn run_chain<K, R>(
        &self,
        providers: Vec<RegisteredProvider>,
        resolve: R,
    ) -> Result<Decision<K::FailCode>, AdmissionError>
    where
        K: VerdictKind,
        R: Fn(&RegisteredProvider) -> Option<PartyCall<K>> + Send + Sync + 'static,
    {
        let verdict = Arc::new(AuthorizationVerdict::<K>::new());
        let barrier = Arc::new(AuthorizationBarrier::<K>::new(providers.len() as u32));
        let mut task = tokio::spawn(run_parties(
            verdict.clone(),
            barrier.clone(),
            providers,
            resolve,
            self.timeouts(),
        ));
        let outcome = tokio::select! {
            biased;
            outcome = barrier.wait() => outcome,
            joined = &mut task => match joined {
                Ok(Ok(())) => barrier.try_result().ok_or_else(|| {
                    AdmissionError::Dispatch("parties finished without resolving".into())
                })?,
                Ok(Err(err)) => return Err(err.into()),
                Err(err) => return Err(AdmissionError::Dispatch(err.to_string())),
            },
        };
        Ok(decide::<K>(outcome, verdict.extension_present()))
    }
}

fn client_label(client: &ClientContext) -> &str {
    client.client_id.as_deref().unwrap_or(UNKNOWN_CLIENT)
}

fn provider_input(client_id: &str, client: &ClientContext) -> AuthorizerProviderInput {
    AuthorizerProviderInput {
        client_id: client_id.to_string(),
        username: client.username.clone(),
        protocol: client.protocol,
    }
}

async fn run_parties<K, R>(
    verdict: Arc<AuthorizationVerdict<K>>,
    barrier: Arc<AuthorizationBarrier<K>>,
    providers: Vec<RegisteredProvider>,
    resolve: R,
    timeouts: AsyncTimeouts,
) -> Result<(), BarrierError>
where
    K: VerdictKind,
    R: Fn(&RegisteredProvider) -> Option<PartyCall<K>> + Send + Sync,
{
    for (index, registered) in providers.iter().enumerate() {
        let turn = index as u32;
        if !verdict.is_decided() {
            if let Some(call) = resolve_party(registered, &resolve) {
                verdict.mark_extension_present();
                let extension = registered.descriptor.key.extension_id.as_str();
                invoke_party(&verdict, turn, extension, call, timeouts).await;
            }
        }
        verdict.advance(turn);
        barrier.report(&verdict)?;
    }
    Ok(())
}

fn resolve_party<K, R>(registered: &RegisteredProvider, resolve: &R) -> Option<PartyCall<K>>
where
    K: VerdictKind,
    R: Fn(&RegisteredProvider) -> Option<PartyCall<K>>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| resolve(registered))) {
        Ok(call) => call,
        Err(payload) => {
            warn!(
                extension = %registered.descriptor.key.extension_id,
                "authorizer provider panicked: {}",
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

async fn invoke_party<K: VerdictKind>(
    verdict: &Arc<AuthorizationVerdict<K>>,
    turn: u32,
    extension: &str,
    call: PartyCall<K>,
    timeouts: AsyncTimeouts,
) {
    let handle = verdict.handle(turn);
    let pending = match panic::catch_unwind(AssertUnwindSafe(|| call(&handle))) {
        Ok(Ok(AuthorizerCall::Done)) => return,
        Ok(Ok(AuthorizerCall::Async(pending))) => pending,
        Ok(Err(err)) => {
            warn!(extension, turn, "authorizer failed: {err}");
            return;
        }
        Err(payload) => {
            warn!(
                extension,
                turn,
                "authorizer panicked: {}",
                panic_message(payload.as_ref())
            );
            return;
        }
    };

    // The completion keeps running after a timeout; its late writes are
    // rejected because the turn has moved on.
    let timeout = timeouts.resolve(pending.timeout);
    let completion = tokio::spawn(pending.completion);
    match tokio::time::timeout(timeout, completion).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(extension, turn, "async authorizer failed: {err}"),
        Ok(Err(err)) => warn!(extension, turn, "async authorizer panicked: {err}"),
        Err(_) => {
            // close the turn before returning so a late answer cannot land
            let failed = match pending.fallback {
                TimeoutFallback::Failure => verdict.force_fail(turn),
                TimeoutFallback::Success => {
                    verdict.advance(turn);
                    false
                }
            };
            debug!(
                extension,
                turn,
                timeout_ms = timeout.as_millis() as u64,
                failed,
                "async authorizer timed out"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
