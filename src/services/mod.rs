pub mod ledger;
pub mod products;
pub mod stock_movements;
