pub mod dlinknet;
pub mod modules;
