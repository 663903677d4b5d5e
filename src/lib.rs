pub mod config;
pub mod logging;
pub mod runner;
pub mod seeded;
pub mod simulator;
pub mod stages;
pub mod store;
