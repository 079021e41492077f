//! A shared observer pointer with one-time exclusive acquisition.
//!
//! The provided [`Escrow`] handle lets any number of observers share one heap
//! resource, with the guarantee that at most one of them can ever
//! [`claim`][Escrow::claim] the resource into a [`Box`] with sole ownership.
//! The handles share a small control block that records the resource address
//! together with two flags: whether the resource was claimed, and whether it
//! was already destroyed. As long as nobody claims, the handle group owns the
//! resource and the last handle destroys it. After a successful claim the
//! returned `Box` is the sole owner and every handle of the group is
//! observation-only from then on.
//!
//! Resource types can opt into destruction detection by embedding a
//! [`Beacon`] and exposing it through the [`Tracked`] trait. The beacon fires
//! from inside the resource's drop glue, so however the resource dies (the
//! group cleaning up, or the external owner dropping the claimed `Box`) every
//! surviving handle observes [`is_expired`][Escrow::is_expired] turning true
//! and subsequent accesses fail instead of handing out a stale address. Types
//! without a beacon still work everywhere, but a destruction performed by the
//! external owner after a claim goes undetected for them.
//!
//! When exclusive ownership lives in a binding that must not be disturbed, a
//! [`lien`] token captures the address from a borrowed `Box` and builds a
//! handle that is observation-only from birth. Handles compare and order by
//! resource address, against each other, against raw pointers and against
//! boxes, so they slot into identity-based containers and assertions.
//!
//! Cloning and dropping handles is atomic and may cross threads, but the two
//! tracked flags are not a synchronization protocol: racing claims from
//! several threads resolve to a single winner, and callers that need more
//! coordination than that must serialize in front of `claim` themselves.

mod escrow;

pub use crate::escrow::{lien, Beacon, Escrow, EscrowError, Lien, Tracked};

#[cfg(test)]
mod test;
