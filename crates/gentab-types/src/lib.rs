//! Values on both sides of the bridge.
//!
//! [`SqliteValue`] is what the engine stores and [`HostValue`] is what host
//! callbacks see; [`marshal`] converts between them under an
//! [`IntegerMode`].

pub mod host;
pub mod marshal;
pub mod value;

pub use host::{HostValue, IntegerMode};
pub use marshal::{to_host, to_native};
pub use value::SqliteValue;
