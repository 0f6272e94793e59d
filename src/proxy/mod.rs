pub mod pool;

pub use pool::{ProxyCredentials, ProxyHealth, ProxyPool, ProxyRecord, ProxyStatus};
