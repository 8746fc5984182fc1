//! Engine-level tests against stub runtimes.
//!
//! - `dispatch` - URI shape, headers, timeouts, cancellation, interception
//! - `streaming` - line and JSON streams over chunked bodies
//! - `hijack` - connection upgrades on raw listeners
//! - `support` - stub servers and clients shared by the above

mod hijack;
mod streaming;
mod support;
