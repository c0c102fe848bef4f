//! Usage: Lesson completion and per-course progress endpoints.

use crate::gateway::request::ApiRequest;
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::shared::error::AppResult;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct LessonCompletion {
    pub id: i64,
    pub student: i64,
    pub lesson: i64,
    pub completed: bool,
}

/// Shape of `GET /courses/{id}/progress/`.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseProgress {
    pub course_id: i64,
    pub total_lessons: u32,
    pub completed_lessons: u32,
    pub progress_percent: f64,
}

pub async fn mark_lesson_completed<T: Transport>(
    gateway: &ApiGateway<T>,
    lesson_id: i64,
) -> AppResult<LessonCompletion> {
    gateway
        .request_json(ApiRequest::post(format!("/lessons/{lesson_id}/completed/")))
        .await
}

pub async fn course_progress<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
) -> AppResult<CourseProgress> {
    gateway
        .request_json(ApiRequest::get(format!("/courses/{course_id}/progress/")))
        .await
}

/// Completion rows the signed-in student has for one lesson: empty when
/// untouched, one row once completed.
pub async fn lesson_completions<T: Transport>(
    gateway: &ApiGateway<T>,
    lesson_id: i64,
) -> AppResult<Vec<LessonCompletion>> {
    gateway
        .request_json(ApiRequest::get(format!("/lessons/per/completion/{lesson_id}/")))
        .await
}
