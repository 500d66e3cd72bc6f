pub mod items;
pub mod stock_ledger;
