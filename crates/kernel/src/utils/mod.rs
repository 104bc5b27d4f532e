pub mod locks;
pub mod types;
