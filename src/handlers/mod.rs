pub mod items;
pub mod movements;
