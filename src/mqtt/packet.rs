use crate::persistence::PayloadId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            2 => Some(Qos::ExactlyOnce),
            _ => None,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V3,
    V311,
    V5,
}

impl ProtocolVersion {
    /// Reason codes and reason strings only exist on the wire from MQTT 5 on.
    pub fn carries_reasons(self) -> bool {
        matches!(self, ProtocolVersion::V5)
    }
}

/// PUBACK / PUBREC reason codes used when an inbound PUBLISH is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckReasonCode {
    Success,
    NoMatchingSubscribers,
    UnspecifiedError,
    ImplementationSpecificError,
    NotAuthorized,
    TopicNameInvalid,
    PacketIdentifierInUse,
    QuotaExceeded,
    PayloadFormatInvalid,
}

impl AckReasonCode {
    pub fn code(self) -> u8 {
        match self {
            AckReasonCode::Success => 0x00,
            AckReasonCode::NoMatchingSubscribers => 0x10,
            AckReasonCode::UnspecifiedError => 0x80,
            AckReasonCode::ImplementationSpecificError => 0x83,
            AckReasonCode::NotAuthorized => 0x87,
            AckReasonCode::TopicNameInvalid => 0x90,
            AckReasonCode::PacketIdentifierInUse => 0x91,
            AckReasonCode::QuotaExceeded => 0x97,
            AckReasonCode::PayloadFormatInvalid => 0x99,
        }
    }

    pub fn is_error(self) -> bool {
        self.code() >= 0x80
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubackReasonCode {
    GrantedQos0,
    GrantedQos1,
    GrantedQos2,
    UnspecifiedError,
    ImplementationSpecificError,
    NotAuthorized,
    TopicFilterInvalid,
    PacketIdentifierInUse,
    QuotaExceeded,
    SharedSubscriptionsNotSupported,
    SubscriptionIdentifiersNotSupported,
    WildcardSubscriptionsNotSupported,
}

impl SubackReasonCode {
    pub fn granted(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => SubackReasonCode::GrantedQos0,
            Qos::AtLeastOnce => SubackReasonCode::GrantedQos1,
            Qos::ExactlyOnce => SubackReasonCode::GrantedQos2,
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(
            self,
            SubackReasonCode::GrantedQos0
                | SubackReasonCode::GrantedQos1
                | SubackReasonCode::GrantedQos2
        )
    }

    pub fn code(self) -> u8 {
        match self {
            SubackReasonCode::GrantedQos0 => 0x00,
            SubackReasonCode::GrantedQos1 => 0x01,
            SubackReasonCode::GrantedQos2 => 0x02,
            SubackReasonCode::UnspecifiedError => 0x80,
            SubackReasonCode::ImplementationSpecificError => 0x83,
            SubackReasonCode::NotAuthorized => 0x87,
            SubackReasonCode::TopicFilterInvalid => 0x8F,
            SubackReasonCode::PacketIdentifierInUse => 0x91,
            SubackReasonCode::QuotaExceeded => 0x97,
            SubackReasonCode::SharedSubscriptionsNotSupported => 0x9E,
            SubackReasonCode::SubscriptionIdentifiersNotSupported => 0xA1,
            SubackReasonCode::WildcardSubscriptionsNotSupported => 0xA2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReasonCode {
    NormalDisconnection,
    UnspecifiedError,
    MalformedPacket,
    ProtocolError,
    ImplementationSpecificError,
    NotAuthorized,
    ServerBusy,
    ServerShuttingDown,
    TopicNameInvalid,
    QuotaExceeded,
    AdministrativeAction,
}

impl DisconnectReasonCode {
    pub fn code(self) -> u8 {
        match self {
            DisconnectReasonCode::NormalDisconnection => 0x00,
            DisconnectReasonCode::UnspecifiedError => 0x80,
            DisconnectReasonCode::MalformedPacket => 0x81,
            DisconnectReasonCode::ProtocolError => 0x82,
            DisconnectReasonCode::ImplementationSpecificError => 0x83,
            DisconnectReasonCode::NotAuthorized => 0x87,
            DisconnectReasonCode::ServerBusy => 0x89,
            DisconnectReasonCode::ServerShuttingDown => 0x8B,
            DisconnectReasonCode::TopicNameInvalid => 0x90,
            DisconnectReasonCode::QuotaExceeded => 0x97,
            DisconnectReasonCode::AdministrativeAction => 0x98,
        }
    }
}

/// CONNACK codes used when a Will publish is refused at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnackReasonCode {
    UnspecifiedError,
    ImplementationSpecificError,
    NotAuthorized,
    TopicNameInvalid,
}

impl ConnackReasonCode {
    pub fn code(self) -> u8 {
        match self {
            ConnackReasonCode::UnspecifiedError => 0x80,
            ConnackReasonCode::ImplementationSpecificError => 0x83,
            ConnackReasonCode::NotAuthorized => 0x87,
            ConnackReasonCode::TopicNameInvalid => 0x90,
        }
    }
}

impl From<AckReasonCode> for ConnackReasonCode {
    fn from(code: AckReasonCode) -> Self {
        match code {
            AckReasonCode::NotAuthorized => ConnackReasonCode::NotAuthorized,
            AckReasonCode::TopicNameInvalid => ConnackReasonCode::TopicNameInvalid,
            AckReasonCode::ImplementationSpecificError => {
                ConnackReasonCode::ImplementationSpecificError
            }
            _ => ConnackReasonCode::UnspecifiedError,
        }
    }
}

/// Connection-level facts the admission path needs about the sender.
#[derive(Debug, Clone)]
pub struct ClientContext {
    /// Absent until CONNECT has been processed.
    pub client_id: Option<String>,
    pub protocol: ProtocolVersion,
    pub username: Option<String>,
}

impl ClientContext {
    pub fn new(client_id: impl Into<String>, protocol: ProtocolVersion) -> Self {
        Self {
            client_id: Some(client_id.into()),
            protocol,
            username: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
    pub message_id: Option<u16>,
}

impl PublishPacket {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: Qos) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            message_id: None,
        }
    }
}

/// Will message carried in CONNECT.
#[derive(Debug, Clone)]
pub struct WillPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: Qos,
}

#[derive(Debug, Clone)]
pub struct SubscribePacket {
    pub message_id: u16,
    pub subscriptions: Vec<Subscription>,
}

/// Close the connection. Code and reason are dropped for pre-5 clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectAction {
    pub code: Option<DisconnectReasonCode>,
    pub reason: Option<String>,
}

impl DisconnectAction {
    pub fn new(
        protocol: ProtocolVersion,
        code: DisconnectReasonCode,
        reason: Option<String>,
    ) -> Self {
        if protocol.carries_reasons() {
            Self {
                code: Some(code),
                reason,
            }
        } else {
            Self {
                code: None,
                reason: None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAdmission {
    /// Deliver; the payload is stored under `payload_id` with one reference.
    Accept { payload_id: PayloadId },
    Reject {
        code: AckReasonCode,
        reason: Option<String>,
    },
    Disconnect(DisconnectAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubackEntry {
    pub code: SubackReasonCode,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeAdmission {
    /// One entry per subscription, in packet order.
    Suback(Vec<SubackEntry>),
    Disconnect(DisconnectAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WillAdmission {
    Accept { payload_id: PayloadId },
    RefuseConnect {
        code: ConnackReasonCode,
        reason: Option<String>,
    },
    Disconnect(DisconnectAction),
}
