//! Gmail evaluator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::{CheckResult, EvaluationReport, Evaluator};
use crate::connectors::{MailApi, MailFolder};
use crate::error::EvalError;
use crate::task::{EvalKind, GmailAction, GmailCheck, MessageInfo};

pub struct GmailEvaluator {
    mail: Arc<dyn MailApi>,
    checks: Vec<GmailCheck>,
    reset_actions: Vec<GmailAction>,
}

impl GmailEvaluator {
    pub fn new(
        mail: Arc<dyn MailApi>,
        checks: Vec<GmailCheck>,
        reset_actions: Vec<GmailAction>,
    ) -> Self {
        Self {
            mail,
            checks,
            reset_actions,
        }
    }

    async fn apply(&self, action: &GmailAction) -> Result<(), EvalError> {
        match action {
            GmailAction::CreateDraft { draft_info } => {
                self.mail.create_draft(draft_info).await?;
            }
            GmailAction::DeleteDraft { draft_info } => {
                self.mail.delete_matching(draft_info, MailFolder::Drafts).await?;
            }
            GmailAction::SendMessage { message_info } => {
                self.mail.send_message(message_info).await?;
            }
            GmailAction::DeleteSentMessage { message_info } => {
                self.mail
                    .delete_matching(message_info, MailFolder::Messages)
                    .await?;
            }
        }
        Ok(())
    }

    async fn check_exists(
        &self,
        report: &mut EvaluationReport,
        check_type: &str,
        info: &MessageInfo,
        folder: MailFolder,
        exists: bool,
    ) -> Result<(), EvalError> {
        let found = !self.mail.search(info, folder).await?.is_empty();
        report.record(CheckResult::from_bool(
            found == exists,
            check_type,
            serde_json::to_string(info).unwrap_or_default(),
            || format!("existence should be {}", exists),
        ));
        Ok(())
    }

    async fn run(&self, report: &mut EvaluationReport) -> Result<(), EvalError> {
        for check in &self.checks {
            match check {
                GmailCheck::CheckDraftExists { draft_info, exists } => {
                    self.check_exists(
                        report,
                        "check_draft_exists",
                        draft_info,
                        MailFolder::Drafts,
                        *exists,
                    )
                    .await?
                }
                GmailCheck::CheckSentMessageExists {
                    message_info,
                    exists,
                } => {
                    self.check_exists(
                        report,
                        "check_sent_message_exists",
                        message_info,
                        MailFolder::Messages,
                        *exists,
                    )
                    .await?
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Evaluator for GmailEvaluator {
    fn kind(&self) -> EvalKind {
        EvalKind::Gmail
    }

    async fn reset(&self) -> bool {
        for action in &self.reset_actions {
            if let Err(e) = self.apply(action).await {
                error!("Gmail reset action {:?} failed: {}", action, e);
                return false;
            }
        }
        true
    }

    async fn evaluate(&self) -> EvaluationReport {
        let mut report = EvaluationReport::new();
        if let Err(e) = self.run(&mut report).await {
            error!("An error occurred in Gmail env: {}", e);
            report.abort(e);
        }
        info!("Gmail evaluation score: {}", report.score);
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connectors::{Connector, MailMessage};
    use crate::error::ConnectorError;
    use serde_json::{json, Map, Value};
    use std::sync::Mutex;

    /// In-memory mailbox. Search queries are ignored; matching happens in
    /// `MailApi::search`.
    #[derive(Default)]
    pub(crate) struct FakeMailbox {
        pub drafts: Mutex<Vec<MailMessage>>,
        pub sent: Mutex<Vec<MailMessage>>,
    }

    fn to_message(id: String, info: &MessageInfo) -> MailMessage {
        MailMessage {
            id,
            subject: info.subject.clone().unwrap_or_default(),
            recipient: info.recipient.clone().unwrap_or_else(|| "default@example.com".into()),
            body: info.body.clone().unwrap_or_default(),
            attachment: info.attachment.clone(),
            cc: info.cc.clone(),
        }
    }

    impl Connector for FakeMailbox {
        fn kind(&self) -> EvalKind {
            EvalKind::Gmail
        }

        fn env_settings(&self) -> Map<String, Value> {
            Map::new()
        }
    }

    #[async_trait]
    impl MailApi for FakeMailbox {
        async fn list(
            &self,
            folder: MailFolder,
            _query: &str,
        ) -> Result<Vec<MailMessage>, ConnectorError> {
            Ok(match folder {
                MailFolder::Drafts => self.drafts.lock().unwrap().clone(),
                MailFolder::Messages => self.sent.lock().unwrap().clone(),
            })
        }

        async fn create_draft(&self, info: &MessageInfo) -> Result<Value, ConnectorError> {
            let mut drafts = self.drafts.lock().unwrap();
            let id = format!("d{}", drafts.len() + 1);
            drafts.push(to_message(id.clone(), info));
            Ok(json!({"id": id}))
        }

        async fn send_message(&self, info: &MessageInfo) -> Result<Value, ConnectorError> {
            let mut sent = self.sent.lock().unwrap();
            let id = format!("m{}", sent.len() + 1);
            sent.push(to_message(id.clone(), info));
            Ok(json!({"id": id}))
        }

        async fn delete(&self, folder: MailFolder, id: &str) -> Result<(), ConnectorError> {
            let store = match folder {
                MailFolder::Drafts => &self.drafts,
                MailFolder::Messages => &self.sent,
            };
            store.lock().unwrap().retain(|m| m.id != id);
            Ok(())
        }
    }

    fn info(subject: &str) -> MessageInfo {
        MessageInfo {
            subject: Some(subject.into()),
            recipient: Some("bob@example.com".into()),
            body: Some("Hello".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reset_and_existence_checks() {
        let mailbox = Arc::new(FakeMailbox::default());
        mailbox.create_draft(&info("Old draft")).await.unwrap();

        let checks: Vec<GmailCheck> = serde_json::from_value(json!([
            {"check_draft_exists": {"draft_info": {"subject": "Old draft"}, "exists": false}},
            {"check_draft_exists": {
                "draft_info": {"subject": "New", "recipient": "Bob <bob@example.com>"},
                "exists": true
            }},
            {"check_sent_message_exists": {
                "message_info": {"subject": "Report", "body": " Hello \n"},
                "exists": true
            }}
        ]))
        .unwrap();
        let eval = GmailEvaluator::new(
            mailbox.clone(),
            checks,
            vec![
                GmailAction::DeleteDraft {
                    draft_info: MessageInfo {
                        subject: Some("Old draft".into()),
                        ..Default::default()
                    },
                },
                GmailAction::CreateDraft { draft_info: info("New") },
                GmailAction::SendMessage {
                    message_info: info("Report"),
                },
            ],
        );

        assert!(eval.reset().await);
        assert_eq!(mailbox.drafts.lock().unwrap().len(), 1);
        let report = eval.evaluate().await;
        assert_eq!(report.score, 1.0, "{:?}", report.feedback());
    }

    #[tokio::test]
    async fn test_missing_message_fails_check() {
        let mailbox = Arc::new(FakeMailbox::default());
        let checks: Vec<GmailCheck> = serde_json::from_value(json!([
            {"check_sent_message_exists": {"message_info": {"subject": "Nope"}, "exists": true}}
        ]))
        .unwrap();
        let eval = GmailEvaluator::new(mailbox, checks, Vec::new());
        let report = eval.evaluate().await;
        assert_eq!(report.score, 0.0);
        assert_eq!(report.checks[0].check_type, "check_sent_message_exists");
    }
}
