pub mod api;
pub mod camera;
pub mod decoder;
pub mod feedback;
