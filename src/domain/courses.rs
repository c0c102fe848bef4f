//! Usage: Course catalog and instructor course management endpoints.

use crate::domain::lessons::Lesson;
use crate::gateway::request::{ApiRequest, MultipartField};
use crate::gateway::transport::Transport;
use crate::gateway::ApiGateway;
use crate::shared::error::AppResult;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Catalog list entry. `lessons_count` is an annotation some endpoints
/// omit, so it defaults to zero.
#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub instructor: i64,
    pub instructor_name: String,
    #[serde(default)]
    pub lessons_count: u32,
    pub created_at: String,
}

/// Detail view: the lesson list rides along instead of the count.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseDetail {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
    pub instructor: i64,
    pub instructor_name: String,
    pub created_at: String,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CourseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Thumbnail upload payload. The gateway sends it as a multipart part with
/// no hand-set content-type header on the request itself, so the transport
/// picks the boundary.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

pub async fn list_courses<T: Transport>(gateway: &ApiGateway<T>) -> AppResult<Vec<Course>> {
    gateway.request_json(ApiRequest::get("/courses/")).await
}

pub async fn get_course<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
) -> AppResult<CourseDetail> {
    gateway
        .request_json(ApiRequest::get(format!("/courses/{course_id}/")))
        .await
}

pub async fn create_course<T: Transport>(
    gateway: &ApiGateway<T>,
    course: &NewCourse,
    thumbnail: Option<Thumbnail>,
) -> AppResult<Course> {
    let request = match thumbnail {
        Some(thumb) => ApiRequest::post("/courses/create/").multipart(vec![
            MultipartField::text("title", course.title.clone()),
            MultipartField::text("description", course.description.clone()),
            MultipartField::file("thumbnail", thumb.file_name, thumb.content_type, thumb.data),
        ]),
        None => {
            let body = serde_json::to_value(course)
                .map_err(|e| format!("SEC_INVALID_INPUT: failed to encode course: {e}"))?;
            ApiRequest::post("/courses/create/").json(body)
        }
    };
    gateway.request_json(request).await
}

pub async fn update_course<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
    update: &CourseUpdate,
) -> AppResult<Course> {
    let body = serde_json::to_value(update)
        .map_err(|e| format!("SEC_INVALID_INPUT: failed to encode course update: {e}"))?;
    gateway
        .request_json(ApiRequest::patch(format!("/courses/{course_id}/manage/")).json(body))
        .await
}

pub async fn delete_course<T: Transport>(
    gateway: &ApiGateway<T>,
    course_id: i64,
) -> AppResult<()> {
    gateway
        .request_unit(ApiRequest::delete(format!("/courses/{course_id}/manage/")))
        .await
}
