//! Usage: Lesson listing and instructor lesson management endpoints.

use crate::gateway::request::ApiRequest;
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::shared::error::AppResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub course: i64,
    pub title: String,
    pub video_url: String,
    /// Minutes.
    pub duration: u32,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewLesson {
    pub title: String,
    pub video_url: String,
    pub duration: u32,
    pub order: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LessonUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

pub async fn list_lessons<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
) -> AppResult<Vec<Lesson>> {
    gateway
        .request_json(ApiRequest::get(format!("/courses/{course_id}/lessons/")))
        .await
}

// No trailing slash; the server routes the create endpoint without one.
pub async fn create_lesson<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
    lesson: &NewLesson,
) -> AppResult<Lesson> {
    let body = serde_json::to_value(lesson)
        .map_err(|e| format!("SEC_INVALID_INPUT: failed to encode lesson: {e}"))?;
    gateway
        .request_json(ApiRequest::post(format!("/courses/{course_id}/lessons/create")).json(body))
        .await
}

pub async fn update_lesson<T: Transport>(
    gateway: &ApiGateway<T>,
    lesson_id: i64,
    update: &LessonUpdate,
) -> AppResult<Lesson> {
    let body = serde_json::to_value(update)
        .map_err(|e| format!("SEC_INVALID_INPUT: failed to encode lesson update: {e}"))?;
    gateway
        .request_json(ApiRequest::patch(format!("/lessons/{lesson_id}/manage/")).json(body))
        .await
}

pub async fn delete_lesson<T: Transport>(
    gateway: &ApiGateway<T>,
    lesson_id: i64,
) -> AppResult<()> {
    gateway
        .request_unit(ApiRequest::delete(format!("/lessons/{lesson_id}/manage/")))
        .await
}
