pub mod auth;
pub mod courses;
pub mod enrollments;
pub mod lessons;
pub mod progress;
