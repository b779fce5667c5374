use super::money::Amount;
use serde::{Deserialize, Serialize};

/// A billable hospital service; its price is what a payment charges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: u64,
    pub name: String,
    pub price: Amount,
}
