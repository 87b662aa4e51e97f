//! Hardware communication.
//!
//! Transport-level framing ([`link`]), the vehicle chassis client
//! ([`rover`]), the sweep instrument client ([`vna`]), the auxiliary output
//! boundary ([`sprayer`]), and loopback mock servers for tests and
//! simulation ([`mock`]).

pub mod link;
pub mod mock;
pub mod rover;
pub mod sprayer;
pub mod vna;

pub use link::{CommandChannel, EventStream, Framing};
pub use rover::RoverClient;
pub use sprayer::{SoftwareSprayer, Sprayer};
pub use vna::VnaClient;
