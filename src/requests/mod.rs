// 可以觸發通知的項目，以及從頁面 wikitext 把它們找出來的比對器

pub mod ga;
pub mod matchers;
pub mod rfc;

pub use ga::{GaNomination, GaTopics};
pub use rfc::{RfC, RfcLedger};
