pub mod hub;

pub use hub::{StateHub, Subscription};
