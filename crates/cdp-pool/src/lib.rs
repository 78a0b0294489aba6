//! Pooled Chrome DevTools Protocol sessions.
//!
//! The pool owns a bounded set of browser connections, each backed by one
//! page target and one flat protocol session. It enables the configured
//! protocol domains at creation time, supervises liveness with a periodic
//! probe loop, funnels raw commands through a uniform outcome envelope and
//! publishes lifecycle notifications on a broadcast channel.

pub mod config;
pub mod metrics;
pub mod pool;
pub mod session;
pub mod stub;
pub mod transport;
pub mod util;

pub use config::{detect_chrome_executable, PoolConfig};
pub use pool::{CommandError, CommandOutcome, CreateOptions, SessionPool};
pub use session::{HealthSnapshot, SessionInfo};
pub use stub::StubTransport;
pub use transport::{BrowserTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};
