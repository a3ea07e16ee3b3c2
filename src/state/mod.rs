//! Live entity state: users, channels, memberships and their stores.

mod channel;
mod store;
mod uid;
mod user;

pub use channel::{Channel, ListEntry, Membership, Topic};
pub use store::{ChannelStore, UserStore};
pub use uid::UidGenerator;
pub use user::{OperInfo, RegPhase, User, UserId};
