//! End-to-end conversation through the whole pipeline with mock backends.

mod common;

use common::{ACK, SYSTEM, Session, audio_files, wait_until};
use std::time::Duration;
use voxloop::audio::playback::MockOutput;
use voxloop::bridge::BridgeEvent;
use voxloop::conversation::Role;
use voxloop::llm::MockLanguageModel;
use voxloop::pipeline::Control;
use voxloop::stt::MockSpeechToText;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn greeting_is_answered_and_played_in_order() {
    let mut session = Session::start(
        MockSpeechToText::new("mock").with_response("こんにちは"),
        MockLanguageModel::new().with_response("こんにちは。元気ですか？"),
        MockOutput::new(),
    );
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Ready));

    session.say();
    let events = session.events_until(BridgeEvent::Deleted(1), TIMEOUT);
    assert_eq!(events, vec![BridgeEvent::Deleted(0), BridgeEvent::Deleted(1)]);

    let requests = session.model.requests();
    assert_eq!(requests.len(), 1);
    let sent: Vec<(Role, &str)> = requests[0]
        .iter()
        .map(|t| (t.role, t.content.as_str()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (Role::System, SYSTEM),
            (Role::Assistant, ACK),
            (Role::User, "こんにちは")
        ]
    );
    assert_eq!(session.synth.sentences(), vec!["こんにちは", "元気ですか"]);

    assert!(session.stop());
    assert_eq!(session.output.started_names(), vec!["0", "1"]);
    assert!(session.output.missing().is_empty());
    assert!(audio_files(&session.work_dir()).is_empty());
}

#[test]
fn segment_ids_keep_increasing_across_replies() {
    let mut session = Session::start(
        MockSpeechToText::new("mock").with_response("もう一度"),
        MockLanguageModel::new().with_response("はい。"),
        MockOutput::new(),
    );
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Ready));

    session.say();
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Deleted(0)));
    session.say();
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Deleted(1)));

    let second = session.model.requests().pop().unwrap();
    let contents: Vec<&str> = second.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec![SYSTEM, ACK, "もう一度", "はい。", "もう一度"]);
}

#[test]
fn reset_returns_the_conversation_to_its_template() {
    let mut session = Session::start(
        MockSpeechToText::new("mock").with_response("覚えてる？"),
        MockLanguageModel::new().with_response("はい。"),
        MockOutput::new(),
    );
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Ready));

    session.say();
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Deleted(0)));

    session.handle().control().send(Control::Reset).unwrap();
    // The reset travels through the conversation queue ahead of the next turn.
    std::thread::sleep(Duration::from_millis(100));
    session.say();
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Deleted(1)));

    let after_reset = session.model.requests().pop().unwrap();
    let contents: Vec<&str> = after_reset.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec![SYSTEM, ACK, "覚えてる？"]);
}

#[test]
fn transcription_failure_asks_the_bridge_to_restart() {
    let mut session = Session::start(
        MockSpeechToText::new("mock").with_failure(),
        MockLanguageModel::new().with_response("はい。"),
        MockOutput::new(),
    );
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Ready));

    session.say();
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Restart));
    assert_eq!(session.model.call_count(), 0);
    assert!(session.handle().is_running());
}

#[test]
fn hallucinated_transcript_never_reaches_the_model() {
    let mut session = Session::start(
        MockSpeechToText::new("mock").with_response("ご視聴ありがとうございました"),
        MockLanguageModel::new().with_response("はい。"),
        MockOutput::new(),
    );
    assert_eq!(session.next_event(TIMEOUT), Some(BridgeEvent::Ready));

    session.say();
    let work_dir = session.work_dir();
    assert!(wait_until(TIMEOUT, || audio_files(&work_dir).is_empty()
        && audio_files(&session.dir.path().join("inbox")).is_empty()));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(session.model.call_count(), 0);
    assert_eq!(session.next_event(Duration::from_millis(100)), None);
}

#[test]
fn acknowledgements_are_recorded() {
    let session = Session::start(
        MockSpeechToText::new("mock"),
        MockLanguageModel::new().with_response("はい。"),
        MockOutput::new(),
    );
    session.handle().control().send(Control::Acknowledge(4)).unwrap();
    assert!(wait_until(TIMEOUT, || session.handle().last_acknowledged() == Some(4)));
}
