// ABOUTME: Browser control layer: driver abstraction, CDP client, sessions
// ABOUTME: Exposes the session manager as the only way tasks obtain a browser

pub mod cdp;
pub mod driver;
pub mod real;
pub mod session;
pub mod simulated;
pub mod vision;

pub use driver::Driver;
pub use session::{BrowserSession, SessionManager};
