pub mod aggregate;
pub mod billing;
pub mod db;
pub mod domain;

pub use aggregate::{Period, Sample, UsageChart};
pub use billing::BillDecision;
pub use domain::{Bill, BillStatus, RawReading, UsageReading};
