pub mod attempt;
pub mod proctor_event;
pub mod user;
