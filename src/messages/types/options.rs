use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{is_not, ClientRoles, Dict, InvocationPolicy, MatchingPolicy, RouterRoles, Value, URI};

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct HelloDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    roles: ClientRoles,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct WelcomeDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent: Option<String>,
    roles: RouterRoles,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct ErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct SubscribeOptions {
    #[serde(
        default,
        rename = "match",
        skip_serializing_if = "MatchingPolicy::is_strict"
    )]
    pub pattern_match: MatchingPolicy,
}

/// The raw options dict attached to a PUBLISH. Unlike the other option
/// structs this stays an open map rather than a fixed set of fields: the
/// Broker echoes it back into every Event's details (with `topic` added),
/// and the meta-event pipeline stamps `session_id` and `details` onto it
/// before handing it to the Broker, so arbitrary keys must round-trip.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PublishOptions(pub Dict);

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct RegisterOptions {
    #[serde(
        default,
        rename = "match",
        skip_serializing_if = "MatchingPolicy::is_strict"
    )]
    pub pattern_match: MatchingPolicy,

    #[serde(
        default,
        rename = "invoke",
        skip_serializing_if = "InvocationPolicy::is_single"
    )]
    pub invocation_policy: InvocationPolicy,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct CallOptions {
    #[serde(default, skip_serializing_if = "is_not")]
    pub receive_progress: bool,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct CancelOptions {}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct InterruptOptions {}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct YieldOptions {
    #[serde(default, skip_serializing_if = "is_not")]
    pub progress: bool,
}

/// The details dict attached to an EVENT. Built by the Broker from the
/// publisher's [`PublishOptions`] dict plus an injected `topic` key, so it
/// is modeled the same way: an open map, not a fixed struct.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct EventDetails(pub Dict);

#[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct InvocationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<URI>,
}

#[derive(PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct ResultDetails {}

impl HelloDetails {
    pub fn new(roles: ClientRoles) -> HelloDetails {
        HelloDetails { roles, agent: None }
    }

    pub fn new_with_agent(roles: ClientRoles, agent: &str) -> HelloDetails {
        HelloDetails {
            roles,
            agent: Some(agent.to_string()),
        }
    }
}

impl WelcomeDetails {
    pub fn new(roles: RouterRoles) -> WelcomeDetails {
        WelcomeDetails { roles, agent: None }
    }

    pub fn new_with_agent(roles: RouterRoles, agent: &str) -> WelcomeDetails {
        WelcomeDetails {
            roles,
            agent: Some(agent.to_string()),
        }
    }
}

impl ErrorDetails {
    pub fn new() -> ErrorDetails {
        ErrorDetails { message: None }
    }

    pub fn new_with_message(message: &str) -> ErrorDetails {
        ErrorDetails {
            message: Some(message.to_string()),
        }
    }
}

impl SubscribeOptions {
    pub fn new() -> SubscribeOptions {
        SubscribeOptions {
            pattern_match: MatchingPolicy::Strict,
        }
    }
}

impl PublishOptions {
    pub fn new(acknowledge: bool) -> PublishOptions {
        let mut options = Dict::new();
        options.insert("acknowledge".to_string(), Value::Boolean(acknowledge));
        PublishOptions(options)
    }

    /// PUBLISHED is sent unless the publisher explicitly opted out.
    pub fn should_acknowledge(&self) -> bool {
        match self.0.get("acknowledge") {
            Some(Value::Boolean(b)) => *b,
            _ => true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }
}

impl Serialize for PublishOptions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublishOptions {
    fn deserialize<D>(deserializer: D) -> Result<PublishOptions, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(PublishOptions(Dict::deserialize(deserializer)?))
    }
}

impl RegisterOptions {
    pub fn new() -> RegisterOptions {
        RegisterOptions {
            pattern_match: MatchingPolicy::Strict,
            invocation_policy: InvocationPolicy::Single,
        }
    }
}

impl CallOptions {
    pub fn new() -> CallOptions {
        CallOptions::default()
    }

    pub fn new_progressive() -> CallOptions {
        CallOptions {
            receive_progress: true,
        }
    }
}

impl CancelOptions {
    pub fn new() -> CancelOptions {
        CancelOptions {}
    }
}

impl InterruptOptions {
    pub fn new() -> InterruptOptions {
        InterruptOptions {}
    }
}

impl YieldOptions {
    pub fn new() -> YieldOptions {
        YieldOptions::default()
    }
}

impl EventDetails {
    pub fn new() -> EventDetails {
        EventDetails(Dict::new())
    }

    pub fn new_with_topic(topic: URI) -> EventDetails {
        EventDetails::from_publish_options(&PublishOptions::default(), &topic)
    }

    /// Builds an EVENT details dict from a publisher's options, plus the
    /// topic the subscription matched on. This is the Broker's fan-out path:
    /// every subscriber sees the publisher's options verbatim, with `topic`
    /// appended.
    pub fn from_publish_options(options: &PublishOptions, topic: &URI) -> EventDetails {
        let mut details = options.0.clone();
        details.insert("topic".to_string(), Value::String(topic.uri.clone()));
        EventDetails(details)
    }

    pub fn topic(&self) -> Option<&str> {
        match self.0.get("topic") {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.0.insert(key, value);
    }
}

impl Serialize for EventDetails {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventDetails {
    fn deserialize<D>(deserializer: D) -> Result<EventDetails, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(EventDetails(Dict::deserialize(deserializer)?))
    }
}

impl InvocationDetails {
    pub fn new() -> InvocationDetails {
        InvocationDetails { procedure: None }
    }
}

impl ResultDetails {
    pub fn new() -> ResultDetails {
        ResultDetails {}
    }
}
