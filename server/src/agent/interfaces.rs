//! C10: narrow, read-only capability interfaces the answer agent consults.
//! Every capability defaults to a no-op so the agent works with nothing
//! configured; a deployment wires in a real implementation (database-backed
//! CV/JD lookup, an embedding-plus-keyword retriever) behind the same trait.

use std::sync::Arc;

use async_trait::async_trait;

/// Best-effort external-knowledge lookup for one question. Disabled by
/// default (`NoopRetriever`); a real implementation might combine embedding
/// similarity with keyword search, as hinted at in the original design notes,
/// but no such fallback chain is required here.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Option<String>;
}

pub struct NoopRetriever;

#[async_trait]
impl KnowledgeRetriever for NoopRetriever {
    async fn retrieve(&self, _query: &str) -> Option<String> {
        None
    }
}

/// A candidate's CV, as the storage collaborator returns it.
#[derive(Debug, Clone, Default)]
pub struct CvRecord {
    pub content: String,
    pub metadata: Option<String>,
}

/// A job description, as the storage collaborator returns it.
#[derive(Debug, Clone, Default)]
pub struct JdRecord {
    pub title: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
}

/// C10's second half: the CV/JD accessor, an internal interface to whatever
/// stores candidate and job material. Disabled by default (`NoopCvJdAccessor`)
/// so the agent works with nothing configured; a deployment wires in a
/// database-backed implementation behind the same trait.
#[async_trait]
pub trait CvJdAccessor: Send + Sync {
    async fn get_cv(&self, user_id: Option<&str>) -> Option<CvRecord>;
    async fn get_jd(&self, session_id: &str) -> Option<JdRecord>;
}

pub struct NoopCvJdAccessor;

#[async_trait]
impl CvJdAccessor for NoopCvJdAccessor {
    async fn get_cv(&self, _user_id: Option<&str>) -> Option<CvRecord> {
        None
    }

    async fn get_jd(&self, _session_id: &str) -> Option<JdRecord> {
        None
    }
}

/// Per-session candidate context: CV/JD text plus the retrieval capability.
/// Read-only from the agent's perspective — nothing here is mutated once a
/// session is created.
pub struct CandidateContext {
    pub cv_text: Option<String>,
    pub jd_title: Option<String>,
    pub jd_requirements: Option<String>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
}

impl Default for CandidateContext {
    fn default() -> Self {
        Self {
            cv_text: None,
            jd_title: None,
            jd_requirements: None,
            retriever: Arc::new(NoopRetriever),
        }
    }
}

impl CandidateContext {
    /// Loads CV/JD once via `accessor` and caches the result here. Called
    /// exactly once, at session creation, per SPEC_FULL.md §6.
    pub async fn with_cv_jd(accessor: &dyn CvJdAccessor, user_id: Option<&str>, session_id: &str) -> Self {
        let cv = accessor.get_cv(user_id).await;
        let jd = accessor.get_jd(session_id).await;
        Self {
            cv_text: cv.map(|record| record.content),
            jd_title: jd.as_ref().map(|record| record.title.clone()),
            jd_requirements: jd.and_then(|record| record.requirements),
            retriever: Arc::new(NoopRetriever),
        }
    }

    pub async fn retrieve_knowledge(&self, query: &str) -> Option<String> {
        self.retriever.retrieve(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_cv_jd_populates_fields_from_the_accessor() {
        struct Fixture;
        #[async_trait]
        impl CvJdAccessor for Fixture {
            async fn get_cv(&self, _user_id: Option<&str>) -> Option<CvRecord> {
                Some(CvRecord { content: "Rust engineer, 5 years".into(), metadata: None })
            }
            async fn get_jd(&self, _session_id: &str) -> Option<JdRecord> {
                Some(JdRecord { title: "Backend Engineer".into(), description: None, requirements: Some("Rust, async".into()) })
            }
        }

        let context = CandidateContext::with_cv_jd(&Fixture, None, "session-1").await;
        assert_eq!(context.cv_text.as_deref(), Some("Rust engineer, 5 years"));
        assert_eq!(context.jd_title.as_deref(), Some("Backend Engineer"));
        assert_eq!(context.jd_requirements.as_deref(), Some("Rust, async"));
    }

    #[tokio::test]
    async fn with_cv_jd_leaves_fields_none_for_the_noop_accessor() {
        let context = CandidateContext::with_cv_jd(&NoopCvJdAccessor, None, "session-1").await;
        assert!(context.cv_text.is_none());
        assert!(context.jd_title.is_none());
        assert!(context.jd_requirements.is_none());
    }
}
