//! View models returned by repository queries.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::PostStatus;

/// One row of the document ↔ post mapping joined with its post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPost {
    pub post_id: i64,
    pub document_id: String,
    pub title: String,
    pub status: PostStatus,
}
