pub mod browser;
pub mod data;
pub mod environment;
pub mod execution_list;
pub mod filter;
pub mod selection;
pub mod test_id;
