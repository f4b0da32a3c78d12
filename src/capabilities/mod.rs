//! Capabilities the native shells resolve for the core. HTTP, key-value
//! storage and render come straight from the crux ecosystem crates; the
//! location watch is our own.

pub mod location;

pub use crux_core::render::Render;
pub use crux_http::Http;
pub use crux_kv::KeyValue;

pub use self::location::{
    Accuracy, Location, LocationError, LocationOperation, PositionFix, PositionResult, WatchConfig,
};

use crux_core::macros::Effect;

use crate::app::App;
use crate::event::Event;

pub type AppHttp = Http<Event>;
pub type AppKeyValue = KeyValue<Event>;
pub type AppLocation = Location<Event>;
pub type AppRender = Render<Event>;

/// One field per capability. The derive builds the `Effect` enum the shells
/// execute and the tests match on.
#[derive(Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub key_value: KeyValue<Event>,
    pub location: Location<Event>,
    pub render: Render<Event>,
}
