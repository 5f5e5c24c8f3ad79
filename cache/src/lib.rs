//! # Lattice Cache
//!
//! Distributed read-through cache of per-user authorization state: roles,
//! account status, refresh token, and subscription snapshot, kept
//! consistent across services purely by reacting to events — no
//! synchronous call to the identity service on the request path.
//!
//! The authorization layer (an upstream gateway or each service's own
//! middleware) rebuilds a request's identity from this cache rather than
//! trusting the bearer token's embedded claims, so a role revoked
//! mid-session takes effect on the next cache read instead of waiting for
//! token expiry. When a gateway forwards already-validated identity via
//! the trusted `X-Auth-Method` / `X-User-Id` / `X-User-Roles` headers,
//! those win; otherwise this cache is the sole source of truth, and a
//! miss always means "not authorized".
//!
//! - [`state`]: the [`UserState`] snapshot and its pure predicates
//! - [`store`]: the [`UserStateCache`] trait
//! - [`redis`]: the shared [`RedisUserStateCache`] backend
//! - [`memory`]: the in-process [`InMemoryUserStateCache`] twin
//! - [`events`] + [`handlers`]: the only writers of the cache
//! - [`sweeper`]: periodic cleanup of expired refresh tokens

pub mod events;
pub mod handlers;
pub mod memory;
pub mod redis;
pub mod state;
pub mod store;
pub mod sweeper;

pub use handlers::{USER_STATE_EVENT_TYPES, register_user_state_handlers};
pub use memory::InMemoryUserStateCache;
pub use redis::RedisUserStateCache;
pub use state::{SubscriptionStatus, UserState, UserStatus, UserSubscription};
pub use store::{CacheError, UserStateCache};
pub use sweeper::{TokenSweeper, TokenSweeperHandle};
