// Adapters layer: concrete implementations for external systems (wiki API, local storage).

pub mod storage;
pub mod wiki;

pub use storage::LocalStorage;
pub use wiki::MediaWikiClient;
