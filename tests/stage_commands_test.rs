//! Stage and detector commands, with the actor wrapper replaced by shell one-liners.

mod common;

use cam_personality::status::ProgressField;
use cam_personality::{PersonalityError, Reply, StatusMap, StatusValue};
use common::{create_personality, create_personality_with, TestPersonality};

fn kwargs(pairs: &[(&str, StatusValue)]) -> StatusMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn with_actor(one_cmd: &str) -> TestPersonality {
    let one_cmd = one_cmd.to_string();
    create_personality_with(move |settings| settings.exec.one_cmd = one_cmd)
}

fn field(fixture: &TestPersonality, tag: &str, field: ProgressField) -> Option<StatusValue> {
    fixture.personality.state().progress().get_tagged(tag, field)
}

#[cfg(unix)]
#[tokio::test]
async fn test_ramp_runs_to_completion() {
    let fixture = with_actor("echo");

    let reply = fixture
        .personality
        .dispatch("mon.ramp", "ramp", vec![], kwargs(&[("nread", StatusValue::Int(2))]))
        .await
        .unwrap();
    assert_eq!(reply, Reply::None);

    let sub = "mon.ramp.1";
    assert!(field(&fixture, sub, ProgressField::TaskStart).is_some());
    assert!(field(&fixture, sub, ProgressField::TaskEnd).is_some());
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("Done with ramp"))
    );
    assert_eq!(field(&fixture, sub, ProgressField::TaskError), None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_ramp_relays_actor_output_before_failing() {
    let fixture = with_actor("printf 'reset 1\\nread 1 of 2\\n'; false");

    let err = fixture
        .personality
        .dispatch("mon.ramp", "ramp", vec![], kwargs(&[("nread", StatusValue::Int(2))]))
        .await
        .unwrap_err();
    assert!(matches!(err, PersonalityError::ExternalCommand(_)));

    let sub = "mon.ramp.1";
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("read 1 of 2"))
    );
    let error = field(&fixture, sub, ProgressField::TaskError).unwrap();
    assert!(error.to_string().contains("exited with 1"), "{}", error);
    assert_eq!(field(&fixture, sub, ProgressField::TaskEnd), None);
}

#[tokio::test]
async fn test_ramp_with_unrepresentable_time_limit_is_rejected() {
    let fixture = with_actor("false");

    let err = fixture
        .personality
        .dispatch(
            "mon.ramp",
            "ramp",
            vec![],
            kwargs(&[
                ("exptime", StatusValue::Float(1e300)),
                ("nread", StatusValue::Int(0)),
            ]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PersonalityError::InvalidArgument { .. }));

    let sub = "mon.ramp.1";
    assert!(field(&fixture, sub, ProgressField::TaskError).is_some());
    assert_eq!(field(&fixture, sub, ProgressField::TaskStart), None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_filter_moves_through_actor() {
    let fixture = with_actor("echo");

    fixture
        .personality
        .dispatch("mon.filter", "filter", vec!["J".into()], StatusMap::new())
        .await
        .unwrap();

    let sub = "mon.filter.1";
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("Moved! "))
    );
    assert!(field(&fixture, sub, ProgressField::TaskEnd).is_some());
}

#[cfg(unix)]
#[tokio::test]
async fn test_filter_failure_reported_on_subtag() {
    let fixture = with_actor("false");

    let err = fixture
        .personality
        .dispatch("mon.filter", "filter", vec!["J".into()], StatusMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PersonalityError::ExternalCommand(_)));

    let sub = "mon.filter.1";
    assert!(field(&fixture, sub, ProgressField::TaskError).is_some());
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("moving filter to J"))
    );
    assert_eq!(field(&fixture, sub, ProgressField::TaskEnd), None);
}

#[tokio::test]
async fn test_shutter_without_position() {
    let fixture = create_personality();

    fixture
        .personality
        .dispatch("mon.shutter", "shutter", vec![], StatusMap::new())
        .await
        .unwrap();

    let sub = "mon.shutter.1";
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("Moved! "))
    );
    assert!(field(&fixture, sub, ProgressField::TaskStart).is_some());
    assert!(field(&fixture, sub, ProgressField::TaskEnd).is_some());
}

#[tokio::test]
async fn test_grism_settles_before_reporting() {
    let fixture = create_personality();

    fixture
        .personality
        .dispatch("mon.grism", "grism", vec!["open".into()], StatusMap::new())
        .await
        .unwrap();

    let sub = "mon.grism.1";
    let started = field(&fixture, sub, ProgressField::TaskStart).unwrap();
    let ended = field(&fixture, sub, ProgressField::TaskEnd).unwrap();
    assert!(ended.as_f64().unwrap() - started.as_f64().unwrap() >= 1.9);
    assert_eq!(
        field(&fixture, sub, ProgressField::CmdStr),
        Some(StatusValue::from("Done."))
    );
}

#[tokio::test]
async fn test_getstatus_reads_through_orchestrator() {
    let fixture = create_personality();

    let reply = fixture
        .personality
        .dispatch("t", "getstatus", vec![], StatusMap::new())
        .await
        .unwrap();
    assert_eq!(reply, Reply::None);
}

#[tokio::test]
async fn test_reqframes_over_cap_rejected() {
    let fixture = create_personality_with(|settings| {
        settings.query_server.max_frames_per_request = 10;
    });

    let err = fixture
        .personality
        .dispatch("t", "reqframes", vec![StatusValue::Int(11)], StatusMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PersonalityError::InvalidArgument { .. }));

    let reply = fixture
        .personality
        .dispatch("t", "reqframes", vec![StatusValue::Int(10)], StatusMap::new())
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Frames(ref f) if f.len() == 10));
}
