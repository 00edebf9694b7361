pub mod bill_queries;
pub mod usage_queries;
