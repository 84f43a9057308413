use super::*;
use crate::control_loop::{LoopState, Run, RunOptions, RunOutcome, Termination};
use crate::errors::RunError;
use crate::pilot::Pilot;
use crate::status::{StatusEvent, StatusPhase};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn pilot(engine: Arc<FakeEngine>, reasoning: Arc<ScriptedReasoning>) -> Pilot {
    Pilot::with_engine(engine, reasoning, fast_config())
}

fn finished(outcome: RunOutcome) -> crate::control_loop::RunReport {
    match outcome {
        RunOutcome::Finished(report) => report,
        RunOutcome::Suspended(s) => panic!("run unexpectedly suspended: {s:?}"),
    }
}

#[tokio::test]
async fn test_run_finishes_with_done_summary() {
    let engine = FakeEngine::notepad();
    let reasoning = ScriptedReasoning::actions(vec![click(150, 120), done("Saved the file")]);
    let pilot = pilot(engine.clone(), reasoning.clone());

    let report = finished(
        pilot
            .run("save the file", RunOptions::default(), CancellationToken::new())
            .await,
    );

    assert_eq!(report.termination, Termination::Done);
    assert_eq!(report.summary, "Saved the file");
    assert_eq!(report.steps_taken(), 2);
    assert_eq!(report.steps[0].action_name(), "Click");
    assert!(report.steps[0].succeeded());
    assert_eq!(engine.desktop().clicks.len(), 1);

    let requests = reasoning.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].step_index, 1);
    assert!(requests[0].prior_observation.is_none());
    assert_eq!(requests[1].step_index, 2);
    let prior = requests[1].prior_observation.as_ref().unwrap();
    assert_eq!(prior.action, "Click");
    assert!(prior.success);
    assert!(requests[1].snapshot_summary.contains("Save"));
    assert!(report.clone().into_result().is_ok());
}

#[tokio::test]
async fn test_step_budget_ends_run_as_exhausted() {
    let reasoning = ScriptedReasoning::repeating(Action::Wait { seconds: 0.0 });
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());
    let options = RunOptions {
        max_steps: Some(5),
        ..RunOptions::default()
    };

    let report = finished(pilot.run("wait forever", options, CancellationToken::new()).await);

    assert_eq!(report.termination, Termination::Exhausted);
    assert_eq!(report.steps_taken(), 5);
    assert_eq!(reasoning.requests().len(), 5);
    assert!(report.summary.contains("limit of 5 steps"));
    match report.into_result() {
        Err(RunError::BudgetExceeded { max_steps, .. }) => assert_eq!(max_steps, 5),
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_consecutive_failures_end_run_as_fatal() {
    // Far outside the 1920x1080 screen, so every click fails.
    let reasoning = ScriptedReasoning::repeating(click(5000, 5000));
    let engine = FakeEngine::notepad();
    let pilot = pilot(engine.clone(), reasoning);

    let report = finished(
        pilot
            .run("click nowhere", RunOptions::default(), CancellationToken::new())
            .await,
    );

    assert_eq!(report.termination, Termination::Fatal);
    assert_eq!(report.steps_taken(), 3);
    assert!(report.steps.iter().all(|s| !s.succeeded()));
    assert!(report.summary.contains("3 consecutive failures"));
    assert!(report.summary.contains("step 1 Click"));
    assert!(report.summary.contains("step 3 Click"));
    assert!(report.summary.contains("outside the screen"));
    assert!(engine.desktop().clicks.is_empty());
    match report.into_result() {
        Err(RunError::FailureLimitExceeded { limit, .. }) => assert_eq!(limit, 3),
        other => panic!("expected FailureLimitExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_success_between_failures_resets_the_streak() {
    let reasoning = ScriptedReasoning::actions(vec![
        click(5000, 5000),
        click(5000, 5000),
        click(150, 120),
        click(5000, 5000),
        click(5000, 5000),
        done("ok"),
    ]);
    let pilot = pilot(FakeEngine::notepad(), reasoning);

    let report = finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);
    assert_eq!(report.termination, Termination::Done);
    assert_eq!(report.steps_taken(), 6);
}

#[tokio::test]
async fn test_backend_errors_count_as_failures() {
    let reasoning = ScriptedReasoning::new(vec![Reply::BackendDown]);
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());

    let report = finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);

    assert_eq!(report.termination, Termination::Fatal);
    assert_eq!(report.steps_taken(), 3);
    assert_eq!(report.steps[0].action_name(), "InvalidDecision");
    assert!(report.steps[0]
        .observation
        .message
        .contains("connection refused"));
    assert!(report.steps[2]
        .observation
        .message
        .contains("script exhausted"));
}

#[tokio::test]
async fn test_unparseable_reply_is_reprompted_once_then_fatal() {
    let reasoning = ScriptedReasoning::new(vec![Reply::Malformed, Reply::Malformed]);
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());

    let report = finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);

    assert_eq!(report.termination, Termination::Fatal);
    assert_eq!(report.steps_taken(), 2);
    let requests = reasoning.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].reprompt.is_none());
    assert!(requests[1]
        .reprompt
        .as_deref()
        .unwrap()
        .contains("No decision found"));
}

#[tokio::test]
async fn test_reprompt_recovers_when_next_reply_parses() {
    let reasoning = ScriptedReasoning::new(vec![Reply::Malformed, Reply::Act(done("fine"))]);
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());

    let report = finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);
    assert_eq!(report.termination, Termination::Done);
    assert_eq!(report.steps_taken(), 2);
    assert!(!report.steps[0].succeeded());
}

#[tokio::test]
async fn test_human_question_suspends_and_resumes_with_answer() {
    let reasoning = ScriptedReasoning::actions(vec![
        Action::Human {
            question: "Which file should I open?".to_string(),
        },
        done("Opened report.txt"),
    ]);
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());

    let outcome = pilot
        .run("open the file", RunOptions::default(), CancellationToken::new())
        .await;
    let suspended = match outcome {
        RunOutcome::Suspended(s) => s,
        RunOutcome::Finished(r) => panic!("expected suspension, got {:?}", r.termination),
    };
    assert_eq!(suspended.question(), "Which file should I open?");
    assert_eq!(suspended.steps_taken(), 1);
    let run_id = suspended.run_id();

    let resumed = suspended.provide_answer("report.txt");
    assert_eq!(resumed.state(), LoopState::Perceiving);
    assert_eq!(resumed.steps_taken(), 1);
    assert_eq!(resumed.id(), run_id);

    let report = finished(resumed.drive().await);
    assert_eq!(report.termination, Termination::Done);
    assert_eq!(report.steps_taken(), 2);
    assert_eq!(report.run_id, run_id);

    let requests = reasoning.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].human_answer.is_none());
    let exchange = requests[1].human_answer.as_ref().unwrap();
    assert_eq!(exchange.question, "Which file should I open?");
    assert_eq!(exchange.answer, "report.txt");
}

#[tokio::test]
async fn test_suspended_run_collapses_to_escalation_error() {
    let reasoning = ScriptedReasoning::actions(vec![Action::Human {
        question: "Password?".to_string(),
    }]);
    let pilot = pilot(FakeEngine::notepad(), reasoning);

    let result = pilot
        .run("log in", RunOptions::default(), CancellationToken::new())
        .await
        .into_result();
    match result {
        Err(RunError::EscalationRequested { question, .. }) => assert_eq!(question, "Password?"),
        other => panic!("expected EscalationRequested, got {other:?}"),
    }
}

#[tokio::test]
async fn test_launch_with_empty_tree_retries_perception_once() {
    let mut desktop = FakeDesktop::default();
    desktop.launchable.insert(
        "notepad".to_string(),
        (
            window(7, "notepad", "Untitled - Notepad", true),
            window_with_buttons(&["File", "Edit", "Save"]),
        ),
    );
    // The freshly launched window reports an empty tree the first time.
    desktop.blank_reads = 1;
    let engine = FakeEngine::new(desktop);
    let reasoning = ScriptedReasoning::actions(vec![
        Action::Launch {
            app: "notepad".to_string(),
        },
        done("Notepad is open"),
    ]);
    let pilot = pilot(engine.clone(), reasoning.clone());

    let report = finished(
        pilot
            .run("open notepad", RunOptions::default(), CancellationToken::new())
            .await,
    );

    assert_eq!(report.termination, Termination::Done);
    assert_eq!(pilot.session().perception_retries(), 1);
    assert_eq!(engine.desktop().launched, vec!["notepad".to_string()]);
    let launch = &report.steps[0].observation;
    assert!(launch.is_success(), "{}", launch.message);
    assert_eq!(launch.data.as_ref().unwrap()["attached"], false);

    // Second decision saw the retried tree, not the blank one.
    let requests = reasoning.requests();
    assert!(requests[1].snapshot_summary.contains("Save"));
}

#[tokio::test]
async fn test_runs_on_one_session_are_serialized() {
    let reasoning = ScriptedReasoning::actions(vec![
        Action::Human {
            question: "Continue?".to_string(),
        },
        done("second run done"),
    ]);
    let pilot = pilot(FakeEngine::notepad(), reasoning.clone());

    let first = match pilot
        .run("first", RunOptions::default(), CancellationToken::new())
        .await
    {
        RunOutcome::Suspended(s) => s,
        RunOutcome::Finished(r) => panic!("expected suspension, got {:?}", r.termination),
    };

    let second_pilot = pilot.clone();
    let mut second = tokio::spawn(async move {
        second_pilot
            .run("second", RunOptions::default(), CancellationToken::new())
            .await
    });

    // The suspended run still holds the lease.
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut second)
        .await
        .is_err());
    assert_eq!(reasoning.requests().len(), 1);

    let first_report = first.cancel();
    assert_eq!(first_report.termination, Termination::Cancelled);

    let second_report = finished(second.await.unwrap());
    assert_eq!(second_report.termination, Termination::Done);
    assert_eq!(second_report.summary, "second run done");
}

#[tokio::test]
async fn test_cancelled_run_stops_before_acting() {
    let reasoning = ScriptedReasoning::repeating(click(150, 120));
    let engine = FakeEngine::notepad();
    let pilot = pilot(engine.clone(), reasoning.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = finished(pilot.run("q", RunOptions::default(), cancel).await);

    assert_eq!(report.termination, Termination::Cancelled);
    assert_eq!(report.steps_taken(), 0);
    assert!(reasoning.requests().is_empty());
    assert!(engine.desktop().clicks.is_empty());
    assert!(matches!(
        report.into_result(),
        Err(RunError::Cancelled { .. })
    ));
}

#[tokio::test]
async fn test_history_window_limits_digests() {
    let reasoning = ScriptedReasoning::repeating(Action::Wait { seconds: 0.0 });
    let mut config = fast_config();
    config.run.history_window = 2;
    config.run.max_steps = 4;
    let pilot = Pilot::with_engine(FakeEngine::notepad(), reasoning.clone(), config);

    finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);

    let requests = reasoning.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[0].history.is_empty());
    assert_eq!(requests[1].history.len(), 1);
    let last: Vec<u32> = requests[3].history.iter().map(|d| d.step).collect();
    assert_eq!(last, vec![2, 3]);
}

#[tokio::test]
async fn test_status_sink_sees_every_phase() {
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
    let reasoning = ScriptedReasoning::actions(vec![click(150, 120), done("ok")]);
    let pilot = pilot(FakeEngine::notepad(), reasoning).with_sink(Arc::new(tx));

    let report = finished(pilot.run("q", RunOptions::default(), CancellationToken::new()).await);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.iter().all(|e| e.run_id == report.run_id));
    let phases: Vec<StatusPhase> = events.iter().map(|e| e.phase).collect();
    assert_eq!(phases.first(), Some(&StatusPhase::Status));
    assert!(phases.contains(&StatusPhase::Thinking));
    assert!(phases.contains(&StatusPhase::ToolUse));
    assert!(phases.contains(&StatusPhase::ToolResult));
    assert!(events
        .iter()
        .any(|e| e.phase == StatusPhase::ToolUse && e.action_name.as_deref() == Some("Click")));
    let last = events.last().unwrap();
    assert_eq!(last.phase, StatusPhase::Status);
    assert!(last.message.starts_with("Run done"));

    // The transcript carries the same events.
    let attached: usize = report
        .transcript
        .entries
        .iter()
        .map(|e| e.step_events.len())
        .sum();
    assert_eq!(attached, events.len());
}

#[tokio::test]
async fn test_manual_run_exposes_state_before_driving() {
    let session = session_on(FakeEngine::notepad(), fast_config());
    let run = Run::new(
        session,
        ScriptedReasoning::actions(vec![done("ok")]),
        Arc::new(crate::status::NullSink),
        "q",
        RunOptions::default(),
        CancellationToken::new(),
    );
    assert_eq!(run.state(), LoopState::Init);
    assert_eq!(run.steps_taken(), 0);
    let report = finished(run.drive().await);
    assert_eq!(report.termination, Termination::Done);
}
