pub mod classes;
pub mod core;
pub mod curriculum;
pub mod publish;
pub mod results;
pub mod scores;
pub mod settings;
pub mod students;
