use std::fmt;

use serde;

pub use self::types::*;
use crate::ID;

mod types;

/// The full WAMP v2 JSON-subset message taxonomy this router speaks.
///
/// Every variant carries its fields in wire declaration order; the integer
/// tag is not stored here, it is synthesized during encode and consumed
/// during decode (see `MessageVisitor`).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(URI, HelloDetails),
    Welcome(ID, WelcomeDetails),
    Abort(ErrorDetails, Reason),
    Goodbye(ErrorDetails, Reason),
    Error(ErrorType, ID, Dict, Reason, Option<List>, Option<Dict>),
    Subscribe(ID, SubscribeOptions, URI),
    Subscribed(ID, ID),
    Unsubscribe(ID, ID),
    Unsubscribed(ID),
    Publish(ID, PublishOptions, URI, Option<List>, Option<Dict>),
    Published(ID, ID),
    Event(ID, ID, EventDetails, Option<List>, Option<Dict>),
    Register(ID, RegisterOptions, URI),
    Registered(ID, ID),
    Unregister(ID, ID),
    Unregistered(ID),
    Call(ID, CallOptions, URI, Option<List>, Option<Dict>),
    Cancel(ID, CancelOptions),
    Invocation(ID, ID, InvocationDetails, Option<List>, Option<Dict>),
    Interrupt(ID, InterruptOptions),
    Yield(ID, YieldOptions, Option<List>, Option<Dict>),
    Result(ID, ResultDetails, Option<List>, Option<Dict>),
}

impl Message {
    /// A short, stable name used in log lines and protocol-violation errors.
    pub fn name(&self) -> &'static str {
        match *self {
            Message::Hello(..) => "HELLO",
            Message::Welcome(..) => "WELCOME",
            Message::Abort(..) => "ABORT",
            Message::Goodbye(..) => "GOODBYE",
            Message::Error(..) => "ERROR",
            Message::Subscribe(..) => "SUBSCRIBE",
            Message::Subscribed(..) => "SUBSCRIBED",
            Message::Unsubscribe(..) => "UNSUBSCRIBE",
            Message::Unsubscribed(..) => "UNSUBSCRIBED",
            Message::Publish(..) => "PUBLISH",
            Message::Published(..) => "PUBLISHED",
            Message::Event(..) => "EVENT",
            Message::Register(..) => "REGISTER",
            Message::Registered(..) => "REGISTERED",
            Message::Unregister(..) => "UNREGISTER",
            Message::Unregistered(..) => "UNREGISTERED",
            Message::Call(..) => "CALL",
            Message::Cancel(..) => "CANCEL",
            Message::Invocation(..) => "INVOCATION",
            Message::Interrupt(..) => "INTERRUPT",
            Message::Yield(..) => "YIELD",
            Message::Result(..) => "RESULT",
        }
    }
}

macro_rules! serialize_with_args {
    ($args:expr, $kwargs:expr, $serializer:expr, $($item: expr),*) => (
        if let Some(ref kwargs) = *$kwargs {
            if let Some(ref args) = *$args {
                ( $($item,)* args, kwargs).serialize($serializer)
            } else {
                ( $($item,)* Vec::<Value>::new(), kwargs).serialize($serializer)
            }
        } else if let Some(ref args) = *$args {
            ( $($item,)* args).serialize($serializer)
        } else {
            ( $($item,)*).serialize($serializer)
        }
    );
}

impl serde::Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match *self {
            Message::Hello(ref realm, ref details) => (1, realm, details).serialize(serializer),
            Message::Welcome(session, ref details) => (2, session, details).serialize(serializer),
            Message::Abort(ref details, ref reason) => (3, details, reason).serialize(serializer),
            Message::Goodbye(ref details, ref reason) => {
                (6, details, reason).serialize(serializer)
            }
            Message::Error(ref ty, id, ref details, ref reason, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 8, ty, id, details, reason)
            }
            Message::Subscribe(request_id, ref options, ref topic) => {
                (32, request_id, options, topic).serialize(serializer)
            }
            Message::Subscribed(request_id, subscription_id) => {
                (33, request_id, subscription_id).serialize(serializer)
            }
            Message::Unsubscribe(request_id, subscription_id) => {
                (34, request_id, subscription_id).serialize(serializer)
            }
            Message::Unsubscribed(request_id) => (35, request_id).serialize(serializer),
            Message::Publish(id, ref options, ref topic, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 16, id, options, topic)
            }
            Message::Published(request_id, publication_id) => {
                (17, request_id, publication_id).serialize(serializer)
            }
            Message::Event(subscription_id, publication_id, ref details, ref args, ref kwargs) => {
                serialize_with_args!(
                    args,
                    kwargs,
                    serializer,
                    36,
                    subscription_id,
                    publication_id,
                    details
                )
            }
            Message::Register(request_id, ref options, ref procedure) => {
                (64, request_id, options, procedure).serialize(serializer)
            }
            Message::Registered(request_id, registration_id) => {
                (65, request_id, registration_id).serialize(serializer)
            }
            Message::Unregister(request_id, registration_id) => {
                (66, request_id, registration_id).serialize(serializer)
            }
            Message::Unregistered(request_id) => (67, request_id).serialize(serializer),
            Message::Call(id, ref options, ref procedure, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 48, id, options, procedure)
            }
            Message::Cancel(request_id, ref options) => {
                (49, request_id, options).serialize(serializer)
            }
            Message::Invocation(id, registration_id, ref details, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 68, id, registration_id, details)
            }
            Message::Interrupt(request_id, ref options) => {
                (69, request_id, options).serialize(serializer)
            }
            Message::Yield(id, ref options, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 70, id, options)
            }
            Message::Result(id, ref details, ref args, ref kwargs) => {
                serialize_with_args!(args, kwargs, serializer, 50, id, details)
            }
        }
    }
}

struct MessageVisitor;

macro_rules! next {
    ($visitor:expr, $what:expr) => {
        match $visitor.next_element()? {
            Some(val) => val,
            None => return Err(serde::de::Error::custom(concat!($what, " missing"))),
        }
    };
}

macro_rules! next_tail {
    ($visitor:expr) => {{
        let args: Option<List> = $visitor.next_element()?;
        let kwargs: Option<Dict> = $visitor.next_element()?;
        (args, kwargs)
    }};
}

impl<'de> serde::de::Visitor<'de> for MessageVisitor {
    type Value = Message;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a WAMP message encoded as a JSON array")
    }

    fn visit_seq<V>(self, mut visitor: V) -> Result<Message, V::Error>
    where
        V: serde::de::SeqAccess<'de>,
    {
        let message_type: u64 = next!(visitor, "message type");
        match message_type {
            1 => {
                let realm = next!(visitor, "realm");
                let details = next!(visitor, "hello details");
                Ok(Message::Hello(realm, details))
            }
            2 => {
                let session = next!(visitor, "session id");
                let details = next!(visitor, "welcome details");
                Ok(Message::Welcome(session, details))
            }
            3 => {
                let details = next!(visitor, "abort details");
                let reason = next!(visitor, "abort reason");
                Ok(Message::Abort(details, reason))
            }
            6 => {
                let details = next!(visitor, "goodbye details");
                let reason = next!(visitor, "goodbye reason");
                Ok(Message::Goodbye(details, reason))
            }
            8 => {
                let error_type = next!(visitor, "error type");
                let request = next!(visitor, "error request id");
                let details = next!(visitor, "error details");
                let reason = next!(visitor, "error reason");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Error(error_type, request, details, reason, args, kwargs))
            }
            16 => {
                let request = next!(visitor, "publish request id");
                let options = next!(visitor, "publish options");
                let topic = next!(visitor, "publish topic");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Publish(request, options, topic, args, kwargs))
            }
            17 => {
                let request = next!(visitor, "published request id");
                let publication = next!(visitor, "published publication id");
                Ok(Message::Published(request, publication))
            }
            32 => {
                let request = next!(visitor, "subscribe request id");
                let options = next!(visitor, "subscribe options");
                let topic = next!(visitor, "subscribe topic");
                Ok(Message::Subscribe(request, options, topic))
            }
            33 => {
                let request = next!(visitor, "subscribed request id");
                let subscription = next!(visitor, "subscribed subscription id");
                Ok(Message::Subscribed(request, subscription))
            }
            34 => {
                let request = next!(visitor, "unsubscribe request id");
                let subscription = next!(visitor, "unsubscribe subscription id");
                Ok(Message::Unsubscribe(request, subscription))
            }
            35 => {
                let request = next!(visitor, "unsubscribed request id");
                Ok(Message::Unsubscribed(request))
            }
            36 => {
                let subscription = next!(visitor, "event subscription id");
                let publication = next!(visitor, "event publication id");
                let details = next!(visitor, "event details");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Event(subscription, publication, details, args, kwargs))
            }
            48 => {
                let request = next!(visitor, "call request id");
                let options = next!(visitor, "call options");
                let procedure = next!(visitor, "call procedure");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Call(request, options, procedure, args, kwargs))
            }
            49 => {
                let request = next!(visitor, "cancel request id");
                let options = next!(visitor, "cancel options");
                Ok(Message::Cancel(request, options))
            }
            50 => {
                let request = next!(visitor, "result request id");
                let details = next!(visitor, "result details");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Result(request, details, args, kwargs))
            }
            64 => {
                let request = next!(visitor, "register request id");
                let options = next!(visitor, "register options");
                let procedure = next!(visitor, "register procedure");
                Ok(Message::Register(request, options, procedure))
            }
            65 => {
                let request = next!(visitor, "registered request id");
                let registration = next!(visitor, "registered registration id");
                Ok(Message::Registered(request, registration))
            }
            66 => {
                let request = next!(visitor, "unregister request id");
                let registration = next!(visitor, "unregister registration id");
                Ok(Message::Unregister(request, registration))
            }
            67 => {
                let request = next!(visitor, "unregistered request id");
                Ok(Message::Unregistered(request))
            }
            68 => {
                let request = next!(visitor, "invocation request id");
                let registration = next!(visitor, "invocation registration id");
                let details = next!(visitor, "invocation details");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Invocation(request, registration, details, args, kwargs))
            }
            69 => {
                let request = next!(visitor, "interrupt request id");
                let options = next!(visitor, "interrupt options");
                Ok(Message::Interrupt(request, options))
            }
            70 => {
                let request = next!(visitor, "yield request id");
                let options = next!(visitor, "yield options");
                let (args, kwargs) = next_tail!(visitor);
                Ok(Message::Yield(request, options, args, kwargs))
            }
            other => Err(serde::de::Error::custom(format!(
                "unsupported WAMP message type: {}",
                other
            ))),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Message, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(MessageVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! round_trip {
        ($name:ident, $message:expr, $json:expr) => {
            #[test]
            fn $name() {
                let message = $message;
                let encoded = serde_json::to_string(&message).unwrap();
                assert_eq!(encoded, $json);
                let decoded: Message = serde_json::from_str($json).unwrap();
                assert_eq!(decoded, message);
            }
        };
    }

    round_trip!(
        hello,
        Message::Hello(URI::new("realm1"), HelloDetails::new(ClientRoles::new())),
        r#"[1,"realm1",{"roles":{"publisher":{"features":{}},"subscriber":{"features":{}},"caller":{"features":{}},"callee":{"features":{}}}}]"#
    );

    round_trip!(
        welcome,
        Message::Welcome(1, WelcomeDetails::new(RouterRoles::new())),
        r#"[2,1,{"roles":{"publisher":{"features":{"publisher_exclusion":true}},"subscriber":{"features":{}},"broker":{"features":{}},"dealer":{"features":{}},"caller":{"features":{"progressive_call_results":true}},"callee":{"features":{"progressive_call_results":true}}}}]"#
    );

    round_trip!(
        abort,
        Message::Abort(ErrorDetails::new(), Reason::NoSuchRealm),
        r#"[3,{},"wamp.error.no_such_realm"]"#
    );

    round_trip!(
        goodbye,
        Message::Goodbye(ErrorDetails::new(), Reason::GoodbyeAndOut),
        r#"[6,{},"wamp.error.goodbye_and_out"]"#
    );

    round_trip!(
        subscribe,
        Message::Subscribe(10, SubscribeOptions::new(), URI::new("foo")),
        r#"[32,10,{},"foo"]"#
    );

    round_trip!(
        subscribed,
        Message::Subscribed(10, 100),
        r#"[33,10,100]"#
    );

    round_trip!(
        unsubscribe,
        Message::Unsubscribe(30, 100),
        r#"[34,30,100]"#
    );

    round_trip!(unsubscribed, Message::Unsubscribed(30), r#"[35,30]"#);

    round_trip!(
        publish_no_args,
        Message::Publish(20, PublishOptions::new(true), URI::new("foo"), None, None),
        r#"[16,20,{"acknowledge":true},"foo"]"#
    );

    round_trip!(
        publish_with_args,
        Message::Publish(
            20,
            PublishOptions::default(),
            URI::new("foo"),
            Some(vec![Value::String("hi".into())]),
            None
        ),
        r#"[16,20,{},"foo",["hi"]]"#
    );

    round_trip!(published, Message::Published(20, 1000), r#"[17,20,1000]"#);

    round_trip!(
        event,
        Message::Event(
            100,
            1000,
            EventDetails::new_with_topic(URI::new("foo")),
            Some(vec![Value::String("hi".into())]),
            None
        ),
        r#"[36,100,1000,{"topic":"foo"},["hi"]]"#
    );

    round_trip!(
        register,
        Message::Register(40, RegisterOptions::new(), URI::new("add")),
        r#"[64,40,{},"add"]"#
    );

    round_trip!(registered, Message::Registered(40, 400), r#"[65,40,400]"#);

    round_trip!(unregister, Message::Unregister(41, 400), r#"[66,41,400]"#);

    round_trip!(unregistered, Message::Unregistered(41), r#"[67,41]"#);

    round_trip!(
        call,
        Message::Call(
            41,
            CallOptions::new(),
            URI::new("add"),
            Some(vec![Value::Integer(2), Value::Integer(3)]),
            None
        ),
        r#"[48,41,{},"add",[2,3]]"#
    );

    round_trip!(
        cancel,
        Message::Cancel(43, CancelOptions::new()),
        r#"[49,43,{}]"#
    );

    round_trip!(
        invocation,
        Message::Invocation(
            41,
            400,
            InvocationDetails::new(),
            Some(vec![Value::Integer(2), Value::Integer(3)]),
            None
        ),
        r#"[68,41,400,{},[2,3]]"#
    );

    round_trip!(
        interrupt,
        Message::Interrupt(43, InterruptOptions::new()),
        r#"[69,43,{}]"#
    );

    round_trip!(
        yield_,
        Message::Yield(
            41,
            YieldOptions::new(),
            Some(vec![Value::Integer(5)]),
            None
        ),
        r#"[70,41,{},[5]]"#
    );

    round_trip!(
        result,
        Message::Result(41, ResultDetails::new(), Some(vec![Value::Integer(5)]), None),
        r#"[50,41,{},[5]]"#
    );

    round_trip!(
        error,
        Message::Error(
            ErrorType::Call,
            42,
            Dict::new(),
            Reason::NoSuchProcedure,
            None,
            None
        ),
        r#"[8,48,42,{},"wamp.error.no_such_procedure"]"#
    );

    #[test]
    fn decode_missing_trailing_fields_is_empty_tail() {
        let decoded: Message = serde_json::from_str(r#"[16,20,{},"foo"]"#).unwrap();
        assert_eq!(
            decoded,
            Message::Publish(20, PublishOptions::default(), URI::new("foo"), None, None)
        );
    }

    #[test]
    fn decode_unsupported_type_fails() {
        let result: Result<Message, _> = serde_json::from_str(r#"[999,1,2,3]"#);
        assert!(result.is_err());
    }

    #[test]
    fn decode_truncated_message_fails() {
        let result: Result<Message, _> = serde_json::from_str(r#"[32,10]"#);
        assert!(result.is_err());
    }
}
