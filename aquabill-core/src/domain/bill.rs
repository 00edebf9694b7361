use std::str::FromStr;

use time::Date;

/// Payment state of a bill. Transitions Unpaid -> Paid when the payment
/// gateway confirms a charge; never the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BillStatus {
    Unpaid,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "Unpaid",
            BillStatus::Paid => "Paid",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown bill status '{0}'")]
pub struct UnknownBillStatus(pub String);

impl FromStr for BillStatus {
    type Err = UnknownBillStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unpaid" => Ok(BillStatus::Unpaid),
            "Paid" => Ok(BillStatus::Paid),
            other => Err(UnknownBillStatus(other.to_string())),
        }
    }
}

/// One monthly bill for an account. At most one exists per
/// (account, calendar month); `bill_number` encodes that key.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Bill {
    pub account_id: String,
    pub bill_number: String,
    pub issued_on: Date,
    pub amount: f64,
    pub due_on: Date,
    pub status: BillStatus,
}
