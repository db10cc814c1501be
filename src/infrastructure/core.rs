mod booking;
mod catalog;
mod payment;

pub use self::booking::*;
pub use self::catalog::*;
pub use self::payment::*;
