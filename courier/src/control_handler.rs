//! Answers control socket requests from the management API and the ingestion
//! port of a running instance.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use courier_common::{Mail, internal};
use courier_control::{
    CommandHandler, ControlError, QueueCommand, RepositoryCommand, Request, RequestCommand,
    Response, ResponseData, SystemCommand,
    protocol::{MailDetails, MailEntry, QueueStats, SystemStatus},
};
use courier_manager::{Ingest, IngestConfig, MailSummary, Management, SpoolContext};

/// Longest body prefix returned when viewing a mail
const BODY_PREVIEW_BYTES: usize = 1024;

pub struct CourierControlHandler {
    management: Management,
    ingest: Ingest,
    processors: Vec<String>,
    workers: usize,
    start_time: Instant,
}

fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn entry(summary: MailSummary) -> MailEntry {
    MailEntry {
        id: summary.id,
        from: summary.sender,
        to: summary.recipients,
        state: summary.state,
        error: summary.error_message,
        hops: summary.hop_count,
        size: summary.size,
        last_updated: millis_since_epoch(summary.last_updated),
    }
}

fn details(mail: &Mail) -> MailDetails {
    let mut attributes: Vec<(String, String)> = mail
        .attributes()
        .iter()
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect();
    attributes.sort_unstable();

    let content = mail.content();
    let body = content.body().unwrap_or_else(|_| content.raw());

    MailDetails {
        entry: entry(MailSummary::from(mail)),
        attributes,
        headers: content.headers().map(<[_]>::to_vec).unwrap_or_default(),
        body_preview: String::from_utf8_lossy(&body[..body.len().min(BODY_PREVIEW_BYTES)])
            .into_owned(),
    }
}

fn failed(err: impl std::fmt::Display) -> ControlError {
    ControlError::ServerError(err.to_string())
}

impl CourierControlHandler {
    #[must_use]
    pub fn new(context: SpoolContext, ingest: IngestConfig, workers: usize) -> Self {
        let processors = context
            .processors()
            .states()
            .into_iter()
            .map(ToString::to_string)
            .collect();

        Self {
            management: Management::new(context.clone()),
            ingest: Ingest::new(context, ingest),
            processors,
            workers,
            start_time: Instant::now(),
        }
    }

    fn system(&self, command: &SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),
            SystemCommand::Status => Response::data(ResponseData::SystemStatus(SystemStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: self.start_time.elapsed().as_secs(),
                queue_size: self.management.queue_size(),
                workers: self.workers,
                processors: self.processors.clone(),
            })),
        }
    }

    async fn queue(&self, command: QueueCommand) -> Response {
        let count = match command {
            QueueCommand::Size => self.management.queue_size(),
            QueueCommand::Stats => {
                let stats = self.management.queue_stats();
                return Response::data(ResponseData::QueueStats(QueueStats {
                    total: stats.total,
                    ready: stats.ready,
                    delayed: stats.delayed,
                    leased: stats.leased,
                }));
            }
            QueueCommand::Clear => self.management.clear().await,
            QueueCommand::Flush => self.management.flush(),
            QueueCommand::RemoveByName(name) => self.management.remove_by_name(&name).await,
            QueueCommand::RemoveBySender(sender) => self.management.remove_by_sender(&sender).await,
            QueueCommand::RemoveByRecipient(recipient) => {
                self.management.remove_by_recipient(&recipient).await
            }
        };

        Response::data(ResponseData::Count(count))
    }

    async fn repository(&self, command: RepositoryCommand) -> courier_control::Result<Response> {
        let data = match command {
            RepositoryCommand::Names => ResponseData::Repositories(self.management.repositories()),
            RepositoryCommand::List { repository } => ResponseData::MailList(
                self.management
                    .list(&repository)
                    .await
                    .map_err(failed)?
                    .into_iter()
                    .map(entry)
                    .collect(),
            ),
            RepositoryCommand::View { repository, id } => ResponseData::MailDetails(details(
                &self.management.view(&repository, &id).await.map_err(failed)?,
            )),
            RepositoryCommand::Replay { repository, id } => ResponseData::Message(
                self.management
                    .replay(&repository, &id)
                    .await
                    .map_err(failed)?
                    .to_string(),
            ),
        };

        Ok(Response::data(data))
    }

    async fn submit(
        &self,
        sender: Option<String>,
        recipients: &[String],
        content: Vec<u8>,
    ) -> courier_control::Result<Response> {
        let recipients: Vec<&str> = recipients.iter().map(String::as_str).collect();
        let id = self
            .ingest
            .accept(sender.as_deref(), &recipients, content)
            .await
            .map_err(failed)?;

        Ok(Response::data(ResponseData::Message(id.to_string())))
    }
}

#[async_trait]
impl CommandHandler for CourierControlHandler {
    async fn handle_request(&self, request: Request) -> courier_control::Result<Response> {
        match request.command {
            RequestCommand::System(command) => {
                internal!(level = DEBUG, "Control request: {command:?}");
                Ok(self.system(&command))
            }
            RequestCommand::Queue(command) => {
                internal!(level = DEBUG, "Control request: {command:?}");
                Ok(self.queue(command).await)
            }
            RequestCommand::Repository(command) => {
                internal!(level = DEBUG, "Control request: {command:?}");
                self.repository(command).await
            }
            RequestCommand::Submit {
                sender,
                recipients,
                content,
            } => {
                internal!(
                    level = DEBUG,
                    "Control submission of {} bytes for {} recipient(s)",
                    content.len(),
                    recipients.len()
                );
                self.submit(sender, &recipients, content).await
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use courier_common::{MailAddress, State};
    use courier_pipeline::{ComponentRegistry, PipelineConfig};
    use courier_queue::MailQueue;
    use courier_control::ResponsePayload;
    use courier_spool::{DEAD_LETTER, MailRepository, MemoryBackend, RepositoryStore};
    use pretty_assertions::assert_eq;

    use super::*;

    fn handler() -> (CourierControlHandler, SpoolContext) {
        let context = SpoolContext::new(
            MailQueue::with_visibility_timeout(
                MailRepository::new("spool", Arc::new(MemoryBackend::new())),
                Duration::from_secs(30),
            ),
            Arc::new(RepositoryStore::new()),
            Arc::new(
                PipelineConfig::default()
                    .build(&ComponentRegistry::with_builtins())
                    .unwrap(),
            ),
        );
        (
            CourierControlHandler::new(context.clone(), IngestConfig::default(), 2),
            context,
        )
    }

    async fn data(handler: &CourierControlHandler, command: RequestCommand) -> ResponseData {
        match handler
            .handle_request(Request::new(command))
            .await
            .unwrap()
            .payload
        {
            ResponsePayload::Data(data) => *data,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    fn submit(sender: &str) -> RequestCommand {
        RequestCommand::Submit {
            sender: Some(sender.to_string()),
            recipients: vec!["a@x.org".to_string()],
            content: b"Subject: hi\r\n\r\nhello\r\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_status() {
        let (handler, _) = handler();
        let ResponseData::SystemStatus(status) =
            data(&handler, RequestCommand::System(SystemCommand::Status)).await
        else {
            panic!("expected a status");
        };

        assert_eq!(status.workers, 2);
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.processors, vec!["error", "root"]);
    }

    #[tokio::test]
    async fn test_submit_then_remove_by_sender() {
        let (handler, _) = handler();
        for _ in 0..5 {
            data(&handler, submit("spam@test")).await;
        }
        data(&handler, submit("friend@x.org")).await;

        let ResponseData::Count(removed) = data(
            &handler,
            RequestCommand::Queue(QueueCommand::RemoveBySender("spam@test".to_string())),
        )
        .await
        else {
            panic!("expected a count");
        };
        assert_eq!(removed, 5);

        let ResponseData::QueueStats(stats) =
            data(&handler, RequestCommand::Queue(QueueCommand::Stats)).await
        else {
            panic!("expected stats");
        };
        assert_eq!(stats.total, 1);
        assert_eq!(stats.ready, 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_an_error() {
        let (handler, _) = handler();
        let err = handler
            .handle_request(Request::new(submit("not an address")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid sender"));
    }

    #[tokio::test]
    async fn test_view_dead_letter() {
        let (handler, context) = handler();
        let mut mail = Mail::new(
            Some(MailAddress::parse("sender@origin.net").unwrap()),
            vec![MailAddress::parse("a@x.org").unwrap()],
            b"Subject: hi\r\nX-Trace: 1\r\n\r\nhello\r\n".to_vec(),
            State::error(),
        );
        mail.set_attribute("spam-score", 7i64);
        let id = mail.id().to_string();
        context.dead_letter(mail, "mailbox full").await.unwrap();

        let ResponseData::MailDetails(details) = data(
            &handler,
            RequestCommand::Repository(RepositoryCommand::View {
                repository: DEAD_LETTER.to_string(),
                id: id.clone(),
            }),
        )
        .await
        else {
            panic!("expected details");
        };

        assert_eq!(details.entry.id, id);
        assert_eq!(details.entry.error.as_deref(), Some("mailbox full"));
        assert_eq!(
            details.attributes,
            vec![("spam-score".to_string(), "7".to_string())]
        );
        assert_eq!(details.headers.len(), 2);
        assert_eq!(details.body_preview, "hello\r\n");

        let err = handler
            .handle_request(Request::new(RequestCommand::Repository(
                RepositoryCommand::List {
                    repository: "missing".to_string(),
                },
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::ServerError(_)));
    }
}
