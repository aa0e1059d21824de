pub mod config;
pub mod evaluate;
pub mod rules;
pub mod run;
