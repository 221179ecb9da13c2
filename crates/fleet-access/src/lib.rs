//! fleet-access — validity of dynamically issued access keys.
//!
//! A key's expiry can depend on when it was first used rather than on a
//! fixed date, so validity is always derived on demand:
//!
//! ```text
//! AccessKeyRecord ──► compute_expiry() ──► evaluate(record, now) ──► ValidityState
//!                                                 ▲
//!                          watch_validity() ──────┘ (re-invoked every period)
//! ```
//!
//! `evaluate` is pure. Countdown refresh for display lives in
//! [`countdown`], outside the evaluator.

pub mod countdown;
pub mod time;
pub mod validity;

pub use countdown::{watch_validity, watch_validity_with};
pub use time::{compute_expiry, format_duration, format_span};
pub use validity::{ValidityState, ValidityView, evaluate};
