#[macro_use]
extern crate log;

mod broker;
mod dealer;
mod error;
mod ids;
mod meta;
mod messages;
mod peer;
mod request_listener;
pub mod router;
mod session;
pub mod server;

pub use error::{Error, ErrorKind};
pub use messages::{ArgDict, ArgList, CallError, Dict, InvocationPolicy, List, MatchingPolicy, Reason, Value, URI};
pub use router::Router;

pub type CallResult<T> = Result<T, CallError>;
pub type WampResult<T> = Result<T, Error>;
pub type ID = u64;
