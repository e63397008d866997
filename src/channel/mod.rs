// Per-axis adapter for a multi-channel motor controller
//
// Provides:
// - Unit conversion between output-shaft units and encoder units
// - Typed parsing of the controller's feedback frames
// - A feedback watchdog per channel
// - The Channel tying them to a command sink

mod adapter;
pub mod frame;
pub mod io;
pub mod units;
pub mod watchdog;

pub use adapter::{Channel, CommandError};
pub use frame::{DecodeError, FeedbackFrame};
pub use io::{CommandSink, FeedbackSource, RecordingSink};
pub use units::UnitConverter;
pub use watchdog::{Transition, Watchdog};
