//! Page lifecycle, readiness waiting, and input dispatch.
//!
//! [`InteractionController`] sits on top of the session pool and the DOM
//! inspector: it owns per-page [`PageState`] (url, title, load flags,
//! back/forward history), drives navigations to DOM readiness, and turns
//! selector-level intents (click, fill, select) into protocol input
//! sequences.

pub mod controller;
pub mod state;
pub mod wait;

pub use controller::{InteractionController, NavigateOptions, DEFAULT_NAVIGATION_TIMEOUT_MS};
pub use state::{NavigationHistory, PageState, Viewport};
pub use wait::{WaitOptions, POLL_INTERVAL_MS};
