pub mod driver;
pub mod fingerprint;
pub mod testing;
pub mod webdriver;

// Re-export common types
pub use driver::{BrowserDriver, ContextOptions, DomSnapshot, PageSession, WaitCondition};
pub use fingerprint::{EvasionProfile, EvasionProfileProvider};
pub use webdriver::WebDriverBrowser;
