pub mod delivery;
pub mod presence;
pub mod rooms;
pub mod store;
