//! Anti-bot reverse gateway for Minecraft-protocol servers.
//!
//! New connections are intercepted at the login boundary and diverted into
//! an ephemeral "limbo" session run entirely inside the gateway: the
//! client is logged into a one-chunk world, teleported above an invisible
//! 8x8 barrier platform, and watched while it falls. Real clients follow
//! the game's gravity curve tick for tick and come to rest on the
//! platform; bots don't. Verified clients are remembered by (IP, UUID) and
//! spliced straight through to the backend on their next connection.
//!
//! # Pipeline
//! An inbound TCP connection is framed by the codec, then the admission
//! pipeline decides its fate: pass through (already verified), verify (a
//! fallback [`session::Session`] is constructed), queue (verifier at
//! capacity), or reject (rate-limited, blacklisted, bad protocol,
//! lockdown). Verification success inserts the identity into the
//! [`verified::VerifiedStore`] and disconnects with a "please reconnect"
//! screen; repeated failure promotes the IP into the
//! [`blacklist::Blacklist`].

pub mod admission;
pub mod assets;
pub mod blacklist;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod verified;
