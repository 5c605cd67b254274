//! Compact binary codecs used by subscription wire messages.
//!
//! Stateless encode/decode routines; nothing here touches the cache.

pub mod short_u16;
