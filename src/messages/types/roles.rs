use serde::{Deserialize, Serialize};

use super::is_not;

/// Role/feature advertisement carried in WELCOME details.
///
/// Most feature flags below are always `false` — this core speaks only the
/// basic WAMP profile — but the shape is still advertised in full so clients
/// that inspect it for capability negotiation see a well-formed dict rather
/// than a missing role. The flags that are genuinely `true` name behavior
/// this core actually implements; see [`RouterRoles::new`].
#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RouterRoles {
    pub publisher: PublisherRole,
    pub subscriber: SubscriberRole,
    pub broker: BrokerRole,
    pub dealer: DealerRole,
    pub caller: CallerRole,
    pub callee: CalleeRole,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct PublisherRole {
    #[serde(default)]
    pub features: PublisherFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct PublisherFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub publisher_identification: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub subscriber_blackwhite_listing: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub publisher_exclusion: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct SubscriberRole {
    #[serde(default)]
    pub features: SubscriberFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct SubscriberFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub publisher_identification: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub pattern_based_subscription: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub subscription_revocation: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct BrokerRole {
    #[serde(default)]
    pub features: BrokerFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct BrokerFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub publisher_identification: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct DealerRole {
    #[serde(default)]
    pub features: DealerFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct DealerFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub caller_identification: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct CallerRole {
    #[serde(default)]
    pub features: CallerFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct CallerFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub caller_identification: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub progressive_call_results: bool,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct CalleeRole {
    #[serde(default)]
    pub features: CalleeFeatures,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct CalleeFeatures {
    #[serde(default, skip_serializing_if = "is_not")]
    pub caller_identification: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub pattern_based_registration: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub shared_registration: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub progressive_call_results: bool,
    #[serde(default, skip_serializing_if = "is_not")]
    pub registration_revocation: bool,
}

impl RouterRoles {
    /// Advertises this core's actual feature set. Every flag defaults to
    /// `false` except the two this core genuinely guarantees:
    /// `progressive_call_results` (§4.5.1, both caller and callee roles) and
    /// `publisher_exclusion` (§4.4: the Broker always excludes the publisher
    /// from its own publication's delivery list, unconditionally).
    #[inline]
    pub fn new() -> RouterRoles {
        RouterRoles {
            publisher: PublisherRole {
                features: PublisherFeatures {
                    publisher_exclusion: true,
                    ..PublisherFeatures::default()
                },
            },
            caller: CallerRole {
                features: CallerFeatures {
                    progressive_call_results: true,
                    ..CallerFeatures::default()
                },
            },
            callee: CalleeRole {
                features: CalleeFeatures {
                    progressive_call_results: true,
                    ..CalleeFeatures::default()
                },
            },
            ..RouterRoles::default()
        }
    }
}

/// Roles a connecting client advertises in HELLO. This core reads them only
/// to decide whether it is talking to something WAMP-shaped; it does not
/// gate behavior on them.
#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct ClientRoles {
    #[serde(default)]
    pub publisher: PublisherRole,
    #[serde(default)]
    pub subscriber: SubscriberRole,
    #[serde(default)]
    pub caller: CallerRole,
    #[serde(default)]
    pub callee: CalleeRole,
}

impl ClientRoles {
    #[inline]
    pub fn new() -> ClientRoles {
        ClientRoles::default()
    }
}
