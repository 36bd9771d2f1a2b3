pub mod diff;
pub mod shell;
pub mod text;
