pub mod arm;
pub mod open;
pub mod status;
