// Course content: fragment types, the content-service boundary, and the
// in-memory course store backing it.
//
// Document parsing and retrieval ranking live behind the `ContentService`
// trait; the store here only holds raw text documents split into
// paragraph fragments with citation metadata.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A retrievable unit of course content with citation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: String,
    pub doc_id: String,
    pub file_name: String,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// A reference to the source material backing a question or explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub file_name: String,
    pub page: u32,
    pub fragment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Fragment {
    /// Build a citation pointing at this fragment, with a truncated snippet.
    pub fn citation(&self) -> Citation {
        let snippet = if self.text.is_empty() {
            None
        } else {
            Some(self.text.chars().take(200).collect())
        };
        Citation {
            doc_id: self.doc_id.clone(),
            file_name: self.file_name.clone(),
            page: self.page,
            fragment_id: self.fragment_id.clone(),
            snippet,
        }
    }
}

/// Boundary contract for course content lookup.
#[async_trait]
pub trait ContentService: Send + Sync {
    async fn course_exists(&self, course_id: &str) -> bool;
    /// All fragments for a course, in document order. Empty if unknown.
    async fn fragments(&self, course_id: &str) -> Vec<Fragment>;
}

/// A raw text document submitted when creating a course.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseDoc {
    pub file_name: String,
    pub text: String,
}

/// Course metadata returned by create/list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub course_id: String,
    pub files: Vec<String>,
    pub fragment_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

struct CourseRecord {
    summary: CourseSummary,
    fragments: Vec<Fragment>,
}

/// In-memory course registry. Splits documents into paragraph fragments;
/// no parsing heuristics beyond blank-line boundaries.
pub struct InMemoryContentStore {
    courses: Mutex<HashMap<String, CourseRecord>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            courses: Mutex::new(HashMap::new()),
        }
    }

    /// Register a course from raw text documents and return its summary.
    pub fn create_course(&self, docs: Vec<CourseDoc>) -> CourseSummary {
        let course_id = short_id();
        let mut fragments = Vec::new();

        for doc in &docs {
            let doc_id = short_id();
            let mut cursor = 0usize;
            for paragraph in doc.text.split("\n\n") {
                let trimmed = paragraph.trim();
                let start = cursor;
                cursor += paragraph.len() + 2;
                if trimmed.is_empty() {
                    continue;
                }
                fragments.push(Fragment {
                    fragment_id: Uuid::new_v4().to_string(),
                    doc_id: doc_id.clone(),
                    file_name: doc.file_name.clone(),
                    page: 1,
                    char_start: start,
                    char_end: start + paragraph.len(),
                    text: trimmed.to_string(),
                });
            }
        }

        let summary = CourseSummary {
            course_id: course_id.clone(),
            files: docs.iter().map(|d| d.file_name.clone()).collect(),
            fragment_count: fragments.len(),
            created_at: chrono::Utc::now(),
        };

        let mut courses = self.courses.lock().unwrap();
        courses.insert(
            course_id,
            CourseRecord {
                summary: summary.clone(),
                fragments,
            },
        );
        summary
    }

    pub fn list_courses(&self) -> Vec<CourseSummary> {
        let courses = self.courses.lock().unwrap();
        let mut list: Vec<CourseSummary> =
            courses.values().map(|r| r.summary.clone()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentService for InMemoryContentStore {
    async fn course_exists(&self, course_id: &str) -> bool {
        self.courses.lock().unwrap().contains_key(course_id)
    }

    async fn fragments(&self, course_id: &str) -> Vec<Fragment> {
        self.courses
            .lock()
            .unwrap()
            .get(course_id)
            .map(|r| r.fragments.clone())
            .unwrap_or_default()
    }
}

/// Short identifier: the first 8 hex chars of a v4 UUID.
fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_docs() -> Vec<CourseDoc> {
        vec![CourseDoc {
            file_name: "notes.txt".into(),
            text: "Paragraph one about sorting.\n\nParagraph two about graphs.\n\n\n\nParagraph three.".into(),
        }]
    }

    #[test]
    fn test_create_course_splits_paragraphs() {
        let store = InMemoryContentStore::new();
        let summary = store.create_course(sample_docs());

        assert_eq!(summary.files, vec!["notes.txt".to_string()]);
        assert_eq!(summary.fragment_count, 3);
        assert_eq!(summary.course_id.len(), 8);
    }

    #[tokio::test]
    async fn test_course_exists_and_fragments() {
        let store = InMemoryContentStore::new();
        let summary = store.create_course(sample_docs());

        assert!(store.course_exists(&summary.course_id).await);
        assert!(!store.course_exists("nope").await);

        let fragments = store.fragments(&summary.course_id).await;
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].text, "Paragraph one about sorting.");
        assert_eq!(fragments[0].file_name, "notes.txt");
        assert!(store.fragments("nope").await.is_empty());
    }

    #[test]
    fn test_fragment_citation_snippet() {
        let frag = Fragment {
            fragment_id: "f1".into(),
            doc_id: "d1".into(),
            file_name: "a.txt".into(),
            page: 1,
            char_start: 0,
            char_end: 300,
            text: "x".repeat(300),
        };
        let citation = frag.citation();
        assert_eq!(citation.fragment_id, "f1");
        assert_eq!(citation.snippet.unwrap().len(), 200);
    }

    #[test]
    fn test_list_courses() {
        let store = InMemoryContentStore::new();
        assert!(store.list_courses().is_empty());
        store.create_course(sample_docs());
        store.create_course(sample_docs());
        assert_eq!(store.list_courses().len(), 2);
    }
}
