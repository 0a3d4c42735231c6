mod console;
mod doctor;
mod poll;
mod status;

pub use console::run_console;
pub use doctor::run_doctor;
pub use poll::run_poll;
pub use status::run_status;
