// Shared selection of configuration root and services
pub mod workspace;

// Commands
pub mod order;
pub mod run;
pub mod services;
