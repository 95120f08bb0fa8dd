pub mod attempt_service;
pub mod enforcement_service;
pub mod event_log;
pub mod gateway_service;
pub mod memory_store;
pub mod presence_service;
pub mod scheduler_service;
pub mod screenshot_service;
pub mod user_service;
