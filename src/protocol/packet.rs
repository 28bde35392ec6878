//! Packet definitions for the verification dialogue.
//!
//! Only the packets the fallback session needs are modeled. Serverbound
//! packets decode just the fields the checks consume; trailing bytes are
//! ignored so cosmetic fields added by newer clients don't break older
//! tables. The version-heavy `JoinGame` layout lives in [`join_game`].

pub mod client;
pub mod join_game;
pub mod server;
