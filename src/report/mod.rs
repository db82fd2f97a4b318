pub mod directory;
pub mod execution;
