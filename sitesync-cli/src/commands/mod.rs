pub mod daemon;
pub mod status;
