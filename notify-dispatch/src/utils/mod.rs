pub mod filename;
pub mod url;
