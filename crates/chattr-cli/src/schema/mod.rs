pub mod attribution;
pub mod path_table;
