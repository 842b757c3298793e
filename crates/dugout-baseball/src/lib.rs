// Baseball domain: roster, lineup/field engine, schedule, stats.

pub mod configurations;
pub mod error;
pub mod lineup;
pub mod player;
pub mod position;
pub mod roster;
pub mod schedule;
pub mod stats;

pub use error::DugoutError;
