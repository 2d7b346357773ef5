//! History cursor tracking
//!
//! Turns a push notification (which only carries a history id) into the
//! ordered list of message ids added since the stored cursor.

pub mod tracker;

pub use tracker::HistoryCursorTracker;
