//! Domain value objects.

pub mod cadence;
pub mod check_mode;
pub mod phone_number;

pub use cadence::{Cadence, CadenceKind};
pub use check_mode::CheckMode;
pub use phone_number::PhoneNumber;
