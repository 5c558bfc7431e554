// Lesson content store (read-only to the sync layer)

use crate::StoreError;
use async_trait::async_trait;
use classsync_core::model::SlideDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Slides of a lesson, ordered by their `order` field
    async fn slides(&self, lesson_id: &str) -> Result<Vec<SlideDescriptor>, StoreError>;

    async fn slide_count(&self, lesson_id: &str) -> Result<u32, StoreError> {
        let slides = self.slides(lesson_id).await?;
        u32::try_from(slides.len()).map_err(|_| StoreError::Rejected {
            path: lesson_id.to_string(),
            reason: "too many slides".to_string(),
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryContentStore {
    lessons: Arc<RwLock<HashMap<String, Vec<SlideDescriptor>>>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_lesson(&self, lesson_id: impl Into<String>, slides: Vec<SlideDescriptor>) {
        let mut lessons = self.lessons.write().await;
        lessons.insert(lesson_id.into(), slides);
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn slides(&self, lesson_id: &str) -> Result<Vec<SlideDescriptor>, StoreError> {
        let lessons = self.lessons.read().await;
        let mut slides = lessons
            .get(lesson_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("lessons/{}", lesson_id)))?;
        slides.sort_by_key(|s| s.order);
        Ok(slides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slide(order: u32) -> SlideDescriptor {
        SlideDescriptor {
            order,
            kind: "text".to_string(),
            content: json!({"title": format!("slide {}", order)}),
        }
    }

    #[tokio::test]
    async fn test_slides_are_ordered() {
        let content = InMemoryContentStore::new();
        content
            .insert_lesson("fractions", vec![slide(2), slide(0), slide(1)])
            .await;

        let slides = content.slides("fractions").await.unwrap();
        let order: Vec<u32> = slides.iter().map(|s| s.order).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(content.slide_count("fractions").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_lesson() {
        let content = InMemoryContentStore::new();
        let err = content.slides("missing").await.unwrap_err();
        assert_eq!(err, StoreError::NotFound("lessons/missing".to_string()));
    }
}
