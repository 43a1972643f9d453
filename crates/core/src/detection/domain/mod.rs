pub mod detector;
pub mod track_lifecycle_manager;
