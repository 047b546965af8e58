#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::{AttributeValue, Mail, MailAddress, MailId, State};
use courier_pipeline::{
    ComponentRegistry, MailetContext, MailetError, MailetOutcome, MatchError, PipelineConfig,
    ProcessorRegistry,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

#[derive(Debug, Default)]
struct RecordingContext {
    stored: Mutex<Vec<(String, Mail)>>,
    submitted: Mutex<Vec<Mail>>,
}

#[async_trait]
impl MailetContext for RecordingContext {
    async fn store(&self, repository: &str, mail: &Mail) -> Result<(), MailetError> {
        if repository == "broken" {
            return Err(MailetError::Failed(String::from("repository offline")));
        }
        self.stored.lock().push((repository.to_string(), mail.clone()));
        Ok(())
    }

    async fn submit(&self, mail: Mail) -> Result<MailId, MailetError> {
        let id = *mail.id();
        self.submitted.lock().push(mail);
        Ok(id)
    }
}

#[derive(Debug)]
struct Explode;

impl courier_pipeline::Matcher for Explode {
    fn match_mail(&self, _mail: &Mail) -> Result<courier_pipeline::MatchOutcome, MatchError> {
        Err(MatchError::Failed(String::from("lookup timed out")))
    }
}

#[derive(Debug)]
struct Fail;

#[async_trait]
impl courier_pipeline::Mailet for Fail {
    async fn service(
        &self,
        _mail: &mut Mail,
        _context: &dyn MailetContext,
    ) -> Result<MailetOutcome, MailetError> {
        Err(MailetError::Failed(String::from("boom")))
    }
}

fn components() -> ComponentRegistry {
    let mut components = ComponentRegistry::with_builtins();
    components
        .register_matcher("Explode", |_| {
            Ok(Arc::new(Explode) as Arc<dyn courier_pipeline::Matcher>)
        })
        .register_mailet("Fail", |_| {
            Ok(Arc::new(Fail) as Arc<dyn courier_pipeline::Mailet>)
        });
    components
}

fn pipeline(ron: &str) -> ProcessorRegistry {
    let config: PipelineConfig = ron::from_str(ron).unwrap();
    config.build(&components()).unwrap()
}

fn addr(s: &str) -> MailAddress {
    MailAddress::parse(s).unwrap()
}

fn mail(recipients: &[&str]) -> Mail {
    Mail::new(
        Some(addr("sender@origin.net")),
        recipients.iter().map(|r| addr(r)).collect::<Vec<_>>(),
        b"Subject: hello\r\n\r\nbody\r\n".to_vec(),
        State::root(),
    )
}

async fn run(registry: &ProcessorRegistry, mail: Mail, context: &RecordingContext) -> Vec<Mail> {
    let processor = registry.resolve(mail.state()).unwrap().clone();
    processor.process(mail, context).await
}

fn by_state<'a>(streams: &'a [Mail], state: &str) -> Vec<&'a Mail> {
    streams
        .iter()
        .filter(|mail| mail.state().as_str() == state)
        .collect()
}

const FORKING: &str = r#"(
    processors: [
        (
            name: "root",
            rules: [
                (matcher: "HostIs=x.org", mailets: [
                    (name: "SetAttribute", config: { "name": "local", "value": "true", "type": "bool" }),
                    (name: "ToProcessor", config: { "processor": "local" }),
                ]),
                (matcher: "All", mailets: [(name: "ToProcessor", config: { "processor": "relay" })]),
            ],
        ),
        (name: "local"),
        (name: "relay"),
        (name: "error"),
    ],
)"#;

#[tokio::test]
async fn test_fork_isolation() {
    let registry = pipeline(FORKING);
    let context = RecordingContext::default();
    let original = mail(&["a@x.org", "b@y.org", "c@x.org"]);
    let original_id = *original.id();

    let streams = run(&registry, original, &context).await;
    assert_eq!(streams.len(), 2);

    let local = by_state(&streams, "local");
    let relay = by_state(&streams, "relay");
    assert_eq!(local.len(), 1);
    assert_eq!(relay.len(), 1);

    let (local, relay) = (local[0], relay[0]);
    assert_eq!(
        local.recipients().as_slice(),
        &[addr("a@x.org"), addr("c@x.org")]
    );
    assert_eq!(relay.recipients().as_slice(), &[addr("b@y.org")]);

    assert_eq!(local.id().root(), original_id.root());
    assert!(local.id().is_branch());
    assert_eq!(relay.id(), &original_id);

    assert_eq!(local.attribute("local"), Some(&AttributeValue::Bool(true)));
    assert_eq!(relay.attribute("local"), None, "remainder never sees the fork's mailets");
}

#[tokio::test]
async fn test_rerunning_a_pass_reproduces_fork_ids() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "RecipientIs=a@x.org", mailets: [(name: "ToProcessor", config: { "processor": "deliver" })]),
                (matcher: "RecipientIs=b@x.org", mailets: [(name: "ToProcessor", config: { "processor": "deliver" })]),
            ], fallthrough: Some("relay")),
            (name: "deliver"),
            (name: "relay"),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();
    let original = mail(&["a@x.org", "b@x.org", "c@x.org"]);

    let ids = |streams: &[Mail]| {
        let mut ids: Vec<MailId> = streams.iter().map(|mail| *mail.id()).collect();
        ids.sort();
        ids
    };

    let first = run(&registry, original.clone(), &context).await;
    let second = run(&registry, original.clone(), &context).await;
    assert_eq!(first.len(), 3);
    assert_eq!(ids(&first), ids(&second));

    let forks: Vec<&Mail> = first.iter().filter(|mail| mail.id().is_branch()).collect();
    assert_eq!(forks.len(), 2);
    assert_ne!(forks[0].id(), forks[1].id());
}

#[tokio::test]
async fn test_full_match_does_not_fork() {
    let registry = pipeline(FORKING);
    let context = RecordingContext::default();
    let original = mail(&["a@x.org", "c@x.org"]);
    let id = *original.id();

    let streams = run(&registry, original, &context).await;
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].id(), &id);
    assert_eq!(streams[0].state().as_str(), "local");
}

#[tokio::test]
async fn test_fallthrough_defaults_to_ghost() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [(matcher: "HostIs=nowhere.test", mailets: [(name: "ToProcessor", config: { "processor": "error" })])]),
            (name: "error"),
            (name: "transport", fallthrough: Some("error")),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org"]), &context).await;
    assert_eq!(streams.len(), 1);
    assert!(streams[0].is_ghost());

    let mut routed = mail(&["a@x.org"]);
    routed.set_state(State::new("transport").unwrap());
    let streams = run(&registry, routed, &context).await;
    assert!(streams[0].state().is_error());
}

#[tokio::test]
async fn test_consumed_recipients_become_ghost() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "RecipientIs=a@x.org", mailets: [(name: "RemoveRecipients")]),
                (matcher: "All", mailets: [(name: "RemoveRecipients", config: { "recipients": "b@x.org" })]),
            ], fallthrough: Some("relay")),
            (name: "relay"),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org", "b@x.org", "c@x.org"]), &context).await;

    let ghosts = by_state(&streams, "ghost");
    let relay = by_state(&streams, "relay");
    assert_eq!(ghosts.len(), 1);
    assert!(ghosts[0].recipients().is_empty());
    assert_eq!(relay.len(), 1);
    assert_eq!(relay[0].recipients().as_slice(), &[addr("c@x.org")]);
}

#[tokio::test]
async fn test_streams_continue_through_later_rules() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "All", mailets: [(name: "SetAttribute", config: { "name": "first", "value": "1", "type": "integer" })]),
                (matcher: "All", mailets: [(name: "AddHeader", config: { "name": "X-Seen", "value": "yes" })]),
            ], fallthrough: Some("done")),
            (name: "done"),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org"]), &context).await;
    assert_eq!(streams.len(), 1);
    let mail = &streams[0];
    assert_eq!(mail.state().as_str(), "done");
    assert_eq!(mail.attribute("first"), Some(&AttributeValue::Integer(1)));
    assert_eq!(mail.content().header("x-seen").unwrap(), Some("yes"));
}

#[tokio::test]
async fn test_matcher_failure_routes_to_error() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "Explode", mailets: [(name: "ToProcessor", config: { "processor": "relay" })]),
            ]),
            (name: "relay"),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org"]), &context).await;
    assert_eq!(streams.len(), 1);
    assert!(streams[0].state().is_error());
    assert_eq!(
        streams[0].error_message(),
        Some("matcher Explode failed: lookup timed out")
    );
}

#[tokio::test]
async fn test_mailet_failure_stops_the_stream() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "HostIs=x.org", mailets: [
                    (name: "Fail"),
                    (name: "SetAttribute", config: { "name": "after", "value": "x" }),
                ]),
            ], fallthrough: Some("relay")),
            (name: "relay"),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org", "b@y.org"]), &context).await;
    let errors = by_state(&streams, "error");
    let relay = by_state(&streams, "relay");

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error_message(), Some("mailet Fail failed: boom"));
    assert_eq!(errors[0].attribute("after"), None);
    assert_eq!(relay.len(), 1, "unmatched recipients are unaffected");
    assert_eq!(relay[0].error_message(), None);
}

#[tokio::test]
async fn test_to_repository_and_bounce() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "All", mailets: [
                    (name: "ToRepository", config: { "repository": "archive", "pass_through": "true" }),
                    (name: "Bounce", config: { "postmaster": "postmaster@courier.test" }),
                ]),
            ]),
            (name: "error", rules: [
                (matcher: "All", mailets: [(name: "ToRepository", config: { "repository": "broken" })]),
            ]),
        ])"#,
    );
    let context = RecordingContext::default();
    let mut failed = mail(&["a@x.org"]);
    failed.set_error_message("mailbox full");

    let streams = run(&registry, failed.clone(), &context).await;
    assert!(streams[0].is_ghost());

    let stored = context.stored.lock().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, "archive");
    assert_eq!(stored[0].1.id(), failed.id());

    let submitted = context.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    let bounce = &submitted[0];
    assert_eq!(bounce.sender(), None);
    assert_eq!(bounce.recipients().as_slice(), &[addr("sender@origin.net")]);
    let body = String::from_utf8(bounce.content().body().unwrap().to_vec()).unwrap();
    assert!(body.contains("mailbox full"));

    let mut in_error = mail(&["a@x.org"]);
    in_error.set_state(State::error());
    let streams = run(&registry, in_error, &context).await;
    assert!(streams[0].state().is_error());
    assert_eq!(
        streams[0].error_message(),
        Some("mailet ToRepository failed: repository offline")
    );
}

#[tokio::test]
async fn test_bounce_reason_cannot_add_lines() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [(matcher: "All", mailets: [(name: "Bounce")])]),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();
    let mut failed = mail(&["a@x.org"]);
    failed.set_error_message("mailbox full\r\nBcc: victim@evil.test\n\nforged body");

    run(&registry, failed, &context).await;

    let submitted = context.submitted.lock().clone();
    assert_eq!(submitted.len(), 1);
    let bounce = &submitted[0];
    assert_eq!(bounce.content().header("bcc").unwrap(), None);

    let body = String::from_utf8(bounce.content().body().unwrap().to_vec()).unwrap();
    assert!(body.contains("Reason: mailbox full  Bcc: victim@evil.test  forged body\r\n"));
    assert_eq!(body.lines().filter(|line| line.contains("victim")).count(), 1);
}

#[tokio::test]
async fn test_route_to_same_state_finishes_the_pass() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [
                (matcher: "All", mailets: [(name: "ToProcessor", config: { "processor": "root" })]),
                (matcher: "All", mailets: [(name: "Ghost")]),
            ]),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let streams = run(&registry, mail(&["a@x.org"]), &context).await;
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].state(), &State::root());
}

#[tokio::test]
async fn test_delay_mailet_waits() {
    let registry = pipeline(
        r#"(processors: [
            (name: "root", rules: [(matcher: "All", mailets: [(name: "Delay", config: { "millis": "50" })])]),
            (name: "error"),
        ])"#,
    );
    let context = RecordingContext::default();

    let started = std::time::Instant::now();
    let streams = run(&registry, mail(&["a@x.org"]), &context).await;
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(streams[0].is_ghost());
}
