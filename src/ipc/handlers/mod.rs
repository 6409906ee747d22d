pub mod attendance;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grade_config;
pub mod marks;
pub mod results;
pub mod students;
