pub mod compression;
pub mod futures;
