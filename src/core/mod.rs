pub mod counter;
pub mod directory;
pub mod messages;
pub mod run;
pub mod runfile;
pub mod sampler;

pub use crate::domain::model::{CounterSnapshot, HeaderMatch, Subscriber};
pub use crate::domain::ports::{ConfigProvider, Requester, Storage, WikiApi};
pub use crate::utils::error::Result;
