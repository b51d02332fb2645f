//! ---
//! gr_section: "01-core-runtime"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Maps inbound control frames to producer switches and replies."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::sync::Arc;

use gr_common::config::DispatchPolicy;
use gr_common::storage::StorageVolume;
use gr_net::{ClientId, ControlHandler};
use tracing::{info, warn};

use crate::control::RestartSignal;
use crate::message::{InboundCommand, OutboundMessage};
use crate::state::{BroadcastState, FrameKind};

const OPERATE: &str = "operate";
const READY: &str = "ready";
const LEAVING: &str = "leaving";
const LIST_FILES: &str = "listFiles";
const DELETE_FILE: &str = "deleteFile";
const ECHO: &str = "echo";
const MCU: &str = "mcu";
const RESTART: &str = "restart";
const LOCKABLE_KEYS: [&str; 3] = ["elevation", "laser", "location"];
const LOCK_VALUES: [&str; 2] = ["lock", "unlock"];
/// Bytes of `{"listFiles":""}` around the listing itself.
const LISTING_ENVELOPE: usize = LIST_FILES.len() + 7;

/// Outcome of dispatching one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Combined reply for the frame; empty means nothing is sent.
    Reply(OutboundMessage),
    /// `mcu:restart` was seen. Nothing is flushed.
    Restart,
}

enum Flow {
    Continue,
    Abort,
    Restart,
}

/// Synchronous handler for control frames.
#[derive(Debug)]
pub struct CommandDispatcher {
    state: Arc<BroadcastState>,
    storage: StorageVolume,
    policy: DispatchPolicy,
    listing_limit: usize,
    restart: RestartSignal,
}

impl CommandDispatcher {
    pub fn new(
        state: Arc<BroadcastState>,
        storage: StorageVolume,
        policy: DispatchPolicy,
        listing_limit: usize,
        restart: RestartSignal,
    ) -> Self {
        Self {
            state,
            storage,
            policy,
            listing_limit,
            restart,
        }
    }

    /// Evaluate every pair in key order and build one combined reply.
    pub fn dispatch(&self, command: &InboundCommand) -> Dispatch {
        let mut reply = OutboundMessage::new();
        for (key, value) in command.iter() {
            let flow = match self.policy {
                DispatchPolicy::Layered => self.layered(key, value, &mut reply),
                DispatchPolicy::FirstMatch => self.first_match(key, value, &mut reply),
            };
            match flow {
                Flow::Continue => {}
                Flow::Abort => break,
                Flow::Restart => return Dispatch::Restart,
            }
        }
        Dispatch::Reply(reply)
    }

    /// Value chain first, then the key checks on the same pair.
    fn layered(&self, key: &str, value: &str, reply: &mut OutboundMessage) -> Flow {
        if key == OPERATE && value == READY {
            self.operate_ready(reply);
        } else if value == READY {
            self.client_ready(reply);
        } else if value == LEAVING {
            return Flow::Abort;
        } else if LOCK_VALUES.contains(&value) {
            if LOCKABLE_KEYS.contains(&key) {
                reply.insert(key, format!("{value}ed"));
            }
        }

        if key == LIST_FILES {
            self.list_files(reply);
        }

        if key == DELETE_FILE {
            self.delete_file(value, reply);
        } else if key == ECHO {
            reply.insert(key, value);
        } else if key == MCU && value == RESTART {
            return Flow::Restart;
        }
        Flow::Continue
    }

    /// One ordered rule list; the first match handles the pair.
    fn first_match(&self, key: &str, value: &str, reply: &mut OutboundMessage) -> Flow {
        match (key, value) {
            (OPERATE, READY) => self.operate_ready(reply),
            (_, READY) => self.client_ready(reply),
            (_, LEAVING) => return Flow::Abort,
            (key, value) if LOCKABLE_KEYS.contains(&key) && LOCK_VALUES.contains(&value) => {
                reply.insert(key, format!("{value}ed"));
            }
            (LIST_FILES, _) => self.list_files(reply),
            (DELETE_FILE, name) => self.delete_file(name, reply),
            (ECHO, value) => reply.insert(ECHO, value),
            (MCU, RESTART) => return Flow::Restart,
            _ => {}
        }
        Flow::Continue
    }

    fn operate_ready(&self, reply: &mut OutboundMessage) {
        self.state.resume_producers();
        let session = self.state.session();
        reply.insert("version", self.state.version());
        reply.insert("mode", session.mode.as_str());
        reply.insert("units", session.units.as_str());
    }

    fn client_ready(&self, reply: &mut OutboundMessage) {
        self.state.pause_producers();
        reply.insert("server", READY);
    }

    fn list_files(&self, reply: &mut OutboundMessage) {
        let listing = self
            .storage
            .list_files(self.listing_limit.min(listing_room(self.state.max_frame_bytes())))
            .unwrap_or_else(|err| {
                warn!(error = %err, "file listing failed");
                String::new()
            });
        reply.insert(LIST_FILES, listing);
    }

    fn delete_file(&self, name: &str, reply: &mut OutboundMessage) {
        match self.storage.delete(name) {
            Ok(()) => reply.insert("fileDeleted", name),
            Err(err) => {
                info!(file = %name, error = %err, "delete refused");
                reply.insert("fileNOTdeleted", name);
            }
        }
    }

    /// Parse, dispatch and publish one inbound text frame.
    pub fn handle_frame(&self, client: ClientId, text: &str) {
        self.state.touch(client);
        let metrics = self.state.metrics();
        let command = match InboundCommand::parse(text) {
            Ok(command) => command,
            Err(err) => {
                warn!(client, error = %err, "discarding malformed frame");
                metrics.record_inbound("malformed");
                return;
            }
        };

        match self.dispatch(&command) {
            Dispatch::Restart => {
                metrics.record_inbound("handled");
                info!(client, "restart requested");
                self.restart.trigger();
            }
            Dispatch::Reply(reply) if reply.is_empty() => {
                metrics.record_inbound("ignored");
            }
            Dispatch::Reply(mut reply) => {
                metrics.record_inbound("handled");
                let dropped = reply.fit_within(self.state.max_frame_bytes());
                if !dropped.is_empty() {
                    warn!(client, dropped = ?dropped, "reply entries exceed frame limit");
                    metrics.record_rejected();
                }
                if !reply.is_empty() {
                    // Encoding failures are logged and counted by publish.
                    let _ = self.state.publish(FrameKind::Reply, &reply);
                }
            }
        }
    }
}

/// Listing bytes that still fit in one frame next to the `listFiles` key.
fn listing_room(max_frame_bytes: usize) -> usize {
    max_frame_bytes.saturating_sub(LISTING_ENVELOPE)
}

impl ControlHandler for CommandDispatcher {
    fn on_connect(&self, client: ClientId) {
        self.state.client_connected(client);
    }

    fn on_disconnect(&self, client: ClientId) {
        self.state.client_disconnected(client);
    }

    fn on_text(&self, client: ClientId, text: &str) {
        self.handle_frame(client, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Producer;
    use gr_common::config::{OperatingMode, Units};
    use gr_common::metrics::RoverMetrics;
    use gr_net::FrameBroadcaster;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        state: Arc<BroadcastState>,
        broadcaster: FrameBroadcaster,
        restart: RestartSignal,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_frame_limit(4096)
        }

        fn with_frame_limit(max_frame_bytes: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("index.html"), "<html/>").unwrap();
            std::fs::write(dir.path().join("menu.html"), "menu").unwrap();
            let broadcaster = FrameBroadcaster::new(16);
            let state = Arc::new(BroadcastState::new(
                OperatingMode::Base,
                Units::Meters,
                "3.0.7".into(),
                broadcaster.clone(),
                RoverMetrics::unregistered().unwrap(),
                max_frame_bytes,
                false,
            ));
            Self {
                dir,
                state,
                broadcaster,
                restart: RestartSignal::new(),
            }
        }

        fn dispatcher(&self, policy: DispatchPolicy) -> CommandDispatcher {
            let storage = StorageVolume::open(self.dir.path(), "index.html").unwrap();
            CommandDispatcher::new(
                self.state.clone(),
                storage,
                policy,
                2048,
                self.restart.clone(),
            )
        }
    }

    fn command(text: &str) -> InboundCommand {
        InboundCommand::parse(text).unwrap()
    }

    fn expect_reply(dispatch: Dispatch) -> OutboundMessage {
        match dispatch {
            Dispatch::Reply(reply) => reply,
            Dispatch::Restart => panic!("unexpected restart"),
        }
    }

    #[test]
    fn operate_ready_resumes_and_reports_session() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        for _ in 0..2 {
            let reply = expect_reply(dispatcher.dispatch(&command(r#"{"operate":"ready"}"#)));
            assert_eq!(reply.keys().collect::<Vec<_>>(), ["version", "mode", "units"]);
            assert_eq!(reply.get("version"), Some(&Value::from("3.0.7")));
            assert_eq!(reply.get("mode"), Some(&Value::from("base")));
            assert_eq!(reply.get("units"), Some(&Value::from("meters")));
            assert!(fixture.state.is_enabled(Producer::Position));
            assert!(fixture.state.is_enabled(Producer::Power));
        }
    }

    #[test]
    fn other_page_ready_pauses() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        fixture.state.resume_producers();
        let reply = expect_reply(dispatcher.dispatch(&command(r#"{"files":"ready"}"#)));
        assert_eq!(reply.encode(256).unwrap(), r#"{"server":"ready"}"#);
        assert!(!fixture.state.is_enabled(Producer::Position));
    }

    #[test]
    fn leaving_aborts_remaining_pairs() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        let reply = expect_reply(dispatcher.dispatch(&command(
            r#"{"foo":"leaving","operate":"ready","echo":"x"}"#,
        )));
        assert!(reply.is_empty());
        assert!(!fixture.state.is_enabled(Producer::Position));

        let reply = reply_of(&dispatcher, r#"{"echo":"before","main":"leaving","echo2":"x"}"#);
        assert_eq!(reply.encode(256).unwrap(), r#"{"echo":"before"}"#);
    }

    fn reply_of(dispatcher: &CommandDispatcher, text: &str) -> OutboundMessage {
        expect_reply(dispatcher.dispatch(&command(text)))
    }

    #[test]
    fn lock_and_unlock_only_for_known_keys() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        assert_eq!(
            reply_of(&dispatcher, r#"{"laser":"lock"}"#).encode(256).unwrap(),
            r#"{"laser":"locked"}"#
        );
        assert_eq!(
            reply_of(&dispatcher, r#"{"laser":"unlock"}"#).encode(256).unwrap(),
            r#"{"laser":"unlocked"}"#
        );
        assert!(reply_of(&dispatcher, r#"{"temperature":"lock"}"#).is_empty());
        assert_eq!(
            reply_of(&dispatcher, r#"{"elevation":"lock","location":"unlock"}"#)
                .encode(256)
                .unwrap(),
            r#"{"elevation":"locked","location":"unlocked"}"#
        );
    }

    #[test]
    fn list_and_delete_files() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        assert_eq!(
            reply_of(&dispatcher, r#"{"listFiles":""}"#).encode(256).unwrap(),
            r#"{"listFiles":"/index.html,/menu.html,"}"#
        );
        assert_eq!(
            reply_of(&dispatcher, r#"{"deleteFile":"/menu.html"}"#)
                .encode(256)
                .unwrap(),
            r#"{"fileDeleted":"/menu.html"}"#
        );
        assert_eq!(
            reply_of(&dispatcher, r#"{"deleteFile":"/menu.html"}"#)
                .encode(256)
                .unwrap(),
            r#"{"fileNOTdeleted":"/menu.html"}"#
        );
        assert_eq!(
            reply_of(&dispatcher, r#"{"deleteFile":"../index.html"}"#)
                .encode(256)
                .unwrap(),
            r#"{"fileNOTdeleted":"../index.html"}"#
        );
        assert!(fixture.dir.path().join("index.html").exists());
    }

    #[test]
    fn layered_policy_evaluates_value_and_key() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        fixture.state.resume_producers();
        let reply = reply_of(&dispatcher, r#"{"echo":"ready"}"#);
        assert_eq!(reply.encode(256).unwrap(), r#"{"server":"ready","echo":"ready"}"#);
        assert!(!fixture.state.is_enabled(Producer::Power));
    }

    #[test]
    fn first_match_policy_stops_at_first_rule() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::FirstMatch);
        let reply = reply_of(&dispatcher, r#"{"echo":"ready"}"#);
        assert_eq!(reply.encode(256).unwrap(), r#"{"server":"ready"}"#);
        assert_eq!(
            reply_of(&dispatcher, r#"{"echo":"hello","laser":"lock"}"#)
                .encode(256)
                .unwrap(),
            r#"{"echo":"hello","laser":"locked"}"#
        );
    }

    #[test]
    fn restart_ends_processing_without_reply() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        assert_eq!(
            dispatcher.dispatch(&command(r#"{"echo":"x","mcu":"restart","laser":"lock"}"#)),
            Dispatch::Restart
        );

        let mut rx = fixture.broadcaster.subscribe();
        dispatcher.handle_frame(1, r#"{"echo":"x","mcu":"restart"}"#);
        assert!(fixture.restart.is_triggered());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn handle_frame_publishes_and_counts() {
        let fixture = Fixture::new();
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        let mut rx = fixture.broadcaster.subscribe();

        dispatcher.handle_frame(7, r#"{"echo":"hello"}"#);
        assert_eq!(rx.try_recv().unwrap(), r#"{"echo":"hello"}"#);

        dispatcher.handle_frame(7, "not json");
        dispatcher.handle_frame(7, r#"{"unknown":"value"}"#);
        assert!(rx.try_recv().is_err());

        let metrics = fixture.state.metrics();
        assert_eq!(metrics.inbound("handled"), 1);
        assert_eq!(metrics.inbound("malformed"), 1);
        assert_eq!(metrics.inbound("ignored"), 1);
        assert_eq!(fixture.state.session().active_client, Some(7));
    }

    #[test]
    fn listing_is_capped_to_the_frame_limit() {
        let fixture = Fixture::with_frame_limit(256);
        for index in 0..31 {
            let name = format!("survey-track-{index:02}.csv");
            std::fs::write(fixture.dir.path().join(name), "x").unwrap();
        }
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        let mut rx = fixture.broadcaster.subscribe();

        dispatcher.handle_frame(1, r#"{"listFiles":""}"#);
        let frame = rx.try_recv().unwrap();
        assert!(frame.len() <= 256, "frame of {} bytes", frame.len());
        let reply: serde_json::Map<String, Value> = serde_json::from_str(&frame).unwrap();
        let listing = reply["listFiles"].as_str().unwrap();
        assert!(listing.starts_with("/index.html,/menu.html,"));
        assert!(!listing.contains("survey-track-30.csv"));
        assert_eq!(fixture.state.metrics().rejected(), 0);
    }

    #[test]
    fn oversized_echo_keeps_the_delete_acknowledgement() {
        let fixture = Fixture::with_frame_limit(256);
        let dispatcher = fixture.dispatcher(DispatchPolicy::Layered);
        let mut rx = fixture.broadcaster.subscribe();

        let frame = format!(r#"{{"deleteFile":"menu.html","echo":"{}"}}"#, "e".repeat(300));
        dispatcher.handle_frame(1, &frame);

        assert!(!fixture.dir.path().join("menu.html").exists());
        assert_eq!(rx.try_recv().unwrap(), r#"{"fileDeleted":"menu.html"}"#);
        assert_eq!(fixture.state.metrics().rejected(), 1);
        assert_eq!(fixture.state.metrics().sent("reply"), 1);
    }
}
