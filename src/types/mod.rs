//!
//! Wire types for both API dialects handled by the proxy.
//!
//! Each dialect gets its own module with narrow, explicit structs per message
//! role rather than a single union-of-everything bag. All payloads are value
//! types: transformers consume and produce them, never mutate in place.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod anthropic;
pub mod openai;
