mod bill;
mod usage_reading;

pub use bill::{Bill, BillStatus, UnknownBillStatus};
pub use usage_reading::{RawReading, UsageReading};
