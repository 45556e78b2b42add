pub mod checkin;
pub mod debounce;
pub mod event;
pub mod gallery;
pub mod participant;
pub mod session;
pub mod settings;
pub mod token;
