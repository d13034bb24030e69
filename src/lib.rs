pub mod calendar;
pub mod capture;
pub mod event;
pub mod logging;
pub mod notify;
pub mod paths;
pub mod permissions;
pub mod pipeline;
pub mod settings;
pub mod vision;
