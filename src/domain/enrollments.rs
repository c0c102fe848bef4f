//! Usage: Student enrollment endpoints.

use crate::domain::courses::Course;
use crate::gateway::request::ApiRequest;
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::shared::error::AppResult;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub student: i64,
    pub course: i64,
    pub enrolled_at: String,
}

/// Enrolls the signed-in student. The server derives student and course
/// from the session and the path, so the body is empty.
pub async fn enroll<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
) -> AppResult<Enrollment> {
    gateway
        .request_json(ApiRequest::post(format!("/courses/{course_id}/enrollment/")))
        .await
}

/// The server answers with the enrolled courses themselves, not the
/// enrollment rows.
pub async fn my_enrollments<T: Transport>(gateway: &ApiGateway<T>) -> AppResult<Vec<Course>> {
    gateway.request_json(ApiRequest::get("/myenrollments/")).await
}
