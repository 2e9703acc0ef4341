pub mod bootstrap;
pub mod serve;
