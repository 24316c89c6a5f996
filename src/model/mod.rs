//! Typed value model shared by entities and indicators
//!
//! A `Value` is the only correlation key. `Entity` and `Ioc` wrap it with
//! provenance and time metadata that never take part in matching.

mod record;
mod value;

pub use record::{Entity, Ioc};
pub use value::{Value, ValueType};
