mod contact;
mod id;
mod kbucket;
pub mod messages;
mod placement;
mod record;

pub use contact::*;
pub use id::*;
pub use kbucket::*;
pub use messages::*;
pub use placement::*;
pub use record::*;
