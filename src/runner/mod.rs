pub mod context;
pub mod definition;
pub mod dispatch;
pub mod display;
pub mod driver;
pub mod execution;
pub mod registry;
pub mod result;
pub mod script;
pub mod unit;
