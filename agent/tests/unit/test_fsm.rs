//! Session FSM tests

use visagent::deploy::fsm::{SessionEvent, SessionFsm, SessionState};

#[test]
fn test_fsm_initial_state() {
    let fsm = SessionFsm::new();
    assert_eq!(fsm.state(), SessionState::NotDeployed);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.sessions(), 0);
}

#[test]
fn test_fsm_deploy_and_end_flow() {
    let mut fsm = SessionFsm::new();

    // NotDeployed -> Deployed
    fsm.process(SessionEvent::Deploy).unwrap();
    assert_eq!(fsm.state(), SessionState::Deployed);

    // Deployed -> NotDeployed
    fsm.process(SessionEvent::End).unwrap();
    assert_eq!(fsm.state(), SessionState::NotDeployed);

    // A second session can start
    fsm.process(SessionEvent::Deploy).unwrap();
    assert_eq!(fsm.sessions(), 2);
}

#[test]
fn test_fsm_acquire_failure_flow() {
    let mut fsm = SessionFsm::new();

    fsm.process(SessionEvent::AcquireFailed("camera not found".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), SessionState::NotDeployed);
    assert_eq!(fsm.error(), Some("camera not found"));

    // Deploying again clears the error
    fsm.process(SessionEvent::Deploy).unwrap();
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_pause_resume_flow() {
    let mut fsm = SessionFsm::new();
    fsm.process(SessionEvent::Deploy).unwrap();

    fsm.process(SessionEvent::Pause).unwrap();
    assert_eq!(fsm.state(), SessionState::Paused);

    // Failing to re-acquire keeps the session paused
    fsm.process(SessionEvent::AcquireFailed("broker down".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), SessionState::Paused);

    fsm.process(SessionEvent::Resume).unwrap();
    assert_eq!(fsm.state(), SessionState::Deployed);
    assert_eq!(fsm.sessions(), 1);
}

#[test]
fn test_fsm_end_from_paused() {
    let mut fsm = SessionFsm::new();
    fsm.process(SessionEvent::Deploy).unwrap();
    fsm.process(SessionEvent::Pause).unwrap();
    fsm.process(SessionEvent::End).unwrap();
    assert_eq!(fsm.state(), SessionState::NotDeployed);
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = SessionFsm::new();

    // Cannot pause, resume or end a session that never started
    assert!(fsm.process(SessionEvent::Pause).is_err());
    assert!(fsm.process(SessionEvent::Resume).is_err());
    assert!(fsm.process(SessionEvent::End).is_err());

    fsm.process(SessionEvent::Deploy).unwrap();

    // Cannot deploy twice or resume a running session
    assert!(fsm.process(SessionEvent::Deploy).is_err());
    assert!(fsm.process(SessionEvent::Resume).is_err());
    assert!(fsm.process(SessionEvent::AcquireFailed("x".to_string())).is_err());
    assert_eq!(fsm.state(), SessionState::Deployed);
}
