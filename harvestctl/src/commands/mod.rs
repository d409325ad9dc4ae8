pub mod files;
pub mod harvest;
