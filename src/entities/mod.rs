pub mod access_token;
pub mod inventory_item;
pub mod stock_movement;
pub mod user;
