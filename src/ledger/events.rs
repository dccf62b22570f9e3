//! Domain Event Recording
//!
//! Entry points called by the template, submission and grading workflows
//! after their own transaction commits.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AppConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::hash::sha256_hex;
use crate::ledger::linker::RecordLinker;
use crate::ledger::record::{LedgerRecord, RecordType};
use crate::ledger::store::LedgerStore;

/// What a workflow does when its event cannot be linked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPolicy {
    /// The domain event fails together with the ledger write
    #[default]
    Strict,
    /// The domain event succeeds without a ledger entry
    Degraded,
}

impl fmt::Display for LinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPolicy::Strict => f.write_str("strict"),
            LinkPolicy::Degraded => f.write_str("degraded"),
        }
    }
}

impl FromStr for LinkPolicy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(LinkPolicy::Strict),
            "degraded" => Ok(LinkPolicy::Degraded),
            other => Err(LedgerError::Config(format!("Unknown link policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(LedgerRecord),
    /// Degraded mode only. Not a verification failure: there is simply no record.
    Unrecorded { reason: String },
}

impl LinkOutcome {
    pub fn record(&self) -> Option<&LedgerRecord> {
        match self {
            LinkOutcome::Linked(record) => Some(record),
            LinkOutcome::Unrecorded { .. } => None,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, LinkOutcome::Linked(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePayload {
    pub title: String,
    pub course_code: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub template_id: String,
    pub student_id: String,
    pub file_hash: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub late: bool,
}

impl SubmissionPayload {
    /// Payload for an uploaded file, hashing its content
    pub fn for_file(template_id: &str, student_id: &str, content: &[u8]) -> Self {
        Self {
            template_id: template_id.to_string(),
            student_id: student_id.to_string(),
            file_hash: sha256_hex(content),
            submitted_at: Utc::now(),
            file_name: None,
            late: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradePayload {
    pub grade: String,
    pub marks: u32,
    pub graded_by: String,
    pub graded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

#[derive(Clone)]
pub struct EventRecorder {
    linker: Arc<RecordLinker>,
    policy: LinkPolicy,
}

impl EventRecorder {
    pub fn new(linker: Arc<RecordLinker>, policy: LinkPolicy) -> Self {
        Self { linker, policy }
    }

    /// Recorder with the configured link policy, storage timeout and retry limit
    pub fn from_config(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Self {
        Self::new(
            Arc::new(RecordLinker::from_config(store, config)),
            config.link_policy,
        )
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    pub async fn template_created(
        &self,
        template_id: &str,
        payload: &TemplatePayload,
    ) -> LedgerResult<LinkOutcome> {
        self.record(RecordType::AssignmentTemplate, template_id, payload)
            .await
    }

    pub async fn submission_received(
        &self,
        submission_id: &str,
        payload: &SubmissionPayload,
    ) -> LedgerResult<LinkOutcome> {
        self.record(RecordType::Submission, submission_id, payload)
            .await
    }

    /// Grades are keyed by the submission they grade
    pub async fn grade_recorded(
        &self,
        submission_id: &str,
        payload: &GradePayload,
    ) -> LedgerResult<LinkOutcome> {
        self.record(RecordType::Grade, submission_id, payload).await
    }

    async fn record<P>(
        &self,
        record_type: RecordType,
        record_id: &str,
        payload: &P,
    ) -> LedgerResult<LinkOutcome>
    where
        P: Serialize + Sync,
    {
        match self.linker.link(record_type, record_id, payload).await {
            Ok(record) => Ok(LinkOutcome::Linked(record)),
            Err(e) if self.policy == LinkPolicy::Degraded => {
                warn!(
                    "Recording {} {} without a ledger entry: {}",
                    record_type, record_id, e
                );
                Ok(LinkOutcome::Unrecorded {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::hash::hash_payload;
    use crate::ledger::store::{LedgerStore, MemoryLedgerStore};
    use async_trait::async_trait;

    struct OfflineStore;

    fn offline<T>() -> LedgerResult<T> {
        Err(LedgerError::StorageUnavailable("database offline".to_string()))
    }

    #[async_trait]
    impl LedgerStore for OfflineStore {
        async fn current_tip(&self) -> LedgerResult<Option<LedgerRecord>> {
            offline()
        }
        async fn append(&self, _record: LedgerRecord) -> LedgerResult<LedgerRecord> {
            offline()
        }
        async fn find_by_record_id(
            &self,
            _record_id: &str,
            _record_type: RecordType,
        ) -> LedgerResult<Option<LedgerRecord>> {
            offline()
        }
        async fn find_by_block_number(&self, _block_number: u64) -> LedgerResult<Option<LedgerRecord>> {
            offline()
        }
        async fn recent(&self, _limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
            offline()
        }
        async fn history(
            &self,
            _record_id: &str,
            _record_type: RecordType,
        ) -> LedgerResult<Vec<LedgerRecord>> {
            offline()
        }
        async fn blocks(&self, _from_block: u64, _limit: usize) -> LedgerResult<Vec<LedgerRecord>> {
            offline()
        }
        async fn count(&self) -> LedgerResult<u64> {
            offline()
        }
    }

    fn grade() -> GradePayload {
        GradePayload {
            grade: "A".to_string(),
            marks: 90,
            graded_by: "lecturer-1".to_string(),
            graded_at: Utc::now(),
            feedback: None,
        }
    }

    #[tokio::test]
    async fn test_workflow_sequence() {
        let linker = Arc::new(RecordLinker::new(Arc::new(MemoryLedgerStore::new())));
        let recorder = EventRecorder::new(linker, LinkPolicy::Strict);

        let template = TemplatePayload {
            title: "Essay".to_string(),
            course_code: "ENG101".to_string(),
            created_by: "lecturer-1".to_string(),
            created_at: Utc::now(),
        };
        let submission = SubmissionPayload::for_file("tmpl-1", "student-7", b"my essay");
        let grade = grade();

        let t = recorder.template_created("tmpl-1", &template).await.unwrap();
        let s = recorder.submission_received("sub-1", &submission).await.unwrap();
        let g = recorder.grade_recorded("sub-1", &grade).await.unwrap();

        let t = t.record().unwrap();
        let s = s.record().unwrap();
        let g = g.record().unwrap();

        assert_eq!((t.block_number, s.block_number, g.block_number), (1, 2, 3));
        assert_eq!(t.record_type, RecordType::AssignmentTemplate);
        assert_eq!(s.record_type, RecordType::Submission);
        assert_eq!(g.record_type, RecordType::Grade);
        assert_eq!(g.record_id, "sub-1");
        assert_eq!(s.data_hash, hash_payload(&submission).unwrap());
        assert_eq!(submission.file_hash, sha256_hex(b"my essay"));
    }

    #[test]
    fn test_payloads_hash_with_camel_case_keys() {
        let payload = SubmissionPayload::for_file("tmpl-1", "student-7", b"x");
        let json = serde_json::to_value(&payload).unwrap();

        assert!(json.get("templateId").is_some());
        assert!(json.get("fileHash").is_some());
        assert!(json.get("fileName").is_none());
    }

    #[tokio::test]
    async fn test_strict_policy_propagates_failure() {
        let linker = Arc::new(RecordLinker::new(Arc::new(OfflineStore)));
        let recorder = EventRecorder::new(linker, LinkPolicy::Strict);

        let result = recorder.grade_recorded("sub-1", &grade()).await;
        assert!(matches!(result, Err(LedgerError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_degraded_policy_reports_unrecorded() {
        let linker = Arc::new(RecordLinker::new(Arc::new(OfflineStore)));
        let recorder = EventRecorder::new(linker, LinkPolicy::Degraded);

        let outcome = recorder.grade_recorded("sub-1", &grade()).await.unwrap();
        assert!(!outcome.is_linked());
        assert!(outcome.record().is_none());
        match outcome {
            LinkOutcome::Unrecorded { reason } => assert!(reason.contains("database offline")),
            other => panic!("expected Unrecorded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recorder_follows_configured_policy() {
        let degraded = AppConfig {
            link_policy: LinkPolicy::Degraded,
            max_append_attempts: 2,
            ..AppConfig::default()
        };
        let recorder = EventRecorder::from_config(Arc::new(OfflineStore), &degraded);
        assert_eq!(recorder.policy(), LinkPolicy::Degraded);

        let outcome = recorder.grade_recorded("sub-1", &grade()).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Unrecorded { .. }));

        let recorder = EventRecorder::from_config(Arc::new(OfflineStore), &AppConfig::default());
        assert!(matches!(
            recorder.grade_recorded("sub-1", &grade()).await,
            Err(LedgerError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_link_policy_parsing() {
        assert_eq!("strict".parse::<LinkPolicy>().unwrap(), LinkPolicy::Strict);
        assert_eq!(" Degraded ".parse::<LinkPolicy>().unwrap(), LinkPolicy::Degraded);
        assert!("lenient".parse::<LinkPolicy>().is_err());
        assert_eq!(LinkPolicy::default(), LinkPolicy::Strict);
    }
}
