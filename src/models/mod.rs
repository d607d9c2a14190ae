pub mod payout;
pub mod response;

pub use payout::*;
pub use response::*;
