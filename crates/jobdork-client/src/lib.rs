#[cfg(feature = "browser")]
pub mod browser;
pub mod circuit;
pub mod fetcher;

#[cfg(feature = "browser")]
pub use browser::{ChromiumRenderer, ChromiumSession};
pub use circuit::TorCircuit;
pub use fetcher::{ReqwestFetcher, USER_AGENTS};
