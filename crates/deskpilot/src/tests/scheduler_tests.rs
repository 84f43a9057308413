use super::*;
use crate::errors::SchedulerError;
use crate::pilot::Pilot;
use crate::scheduler::{Cadence, ScheduledTask, Scheduler, TaskState, TaskStatus};
use chrono::Local;
use std::time::Duration;
use uuid::Uuid;

fn scheduler(reasoning: Arc<ScriptedReasoning>) -> Scheduler {
    Scheduler::new(Pilot::with_engine(
        FakeEngine::notepad(),
        reasoning,
        fast_config(),
    ))
}

/// Wait until the task's state satisfies `done`, or panic after a few seconds.
async fn wait_for(
    scheduler: &Scheduler,
    id: Uuid,
    done: impl Fn(&TaskState) -> bool,
) -> TaskState {
    let mut rx = scheduler.subscribe();
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(state) = rx.borrow_and_update().get(&id).filter(|s| done(s)).cloned() {
                return state;
            }
            if rx.changed().await.is_err() {
                panic!("scheduler dropped");
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("task {id} never reached the expected state"))
}

#[tokio::test]
async fn test_immediate_task_runs_to_completion() {
    let sched = scheduler(ScriptedReasoning::actions(vec![done("checked mail")]));
    let id = sched
        .schedule(ScheduledTask::new("check mail"))
        .unwrap();

    let state = wait_for(&sched, id, |s| s.status == TaskStatus::Completed).await;
    assert_eq!(state.runs, 1);
    assert_eq!(state.last_outcome, Some(TaskStatus::Completed));
    assert!(state.last_error.is_none());
    assert!(state.last_run_at.is_some());
    sched.shutdown().await;
}

#[tokio::test]
async fn test_finished_one_shot_task_is_forgotten() {
    let sched = scheduler(ScriptedReasoning::actions(vec![done("sent")]));
    let id = sched.schedule(ScheduledTask::new("send report")).unwrap();
    wait_for(&sched, id, |s| s.status == TaskStatus::Completed).await;

    // The handle goes away once the task's future returns; the status stays.
    let forgotten = tokio::time::timeout(Duration::from_secs(5), async {
        while sched.cancel(id).is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(forgotten.is_ok(), "task handle was never released");
    assert_eq!(sched.status(id).unwrap().status, TaskStatus::Completed);
    sched.shutdown().await;
}

#[tokio::test]
async fn test_escalation_reports_failed_with_question() {
    let sched = scheduler(ScriptedReasoning::actions(vec![Action::Human {
        question: "Which account?".to_string(),
    }]));
    let id = sched.schedule(ScheduledTask::new("pay the bill")).unwrap();

    let state = wait_for(&sched, id, |s| s.status == TaskStatus::Failed).await;
    assert!(state.last_error.as_deref().unwrap().contains("Which account?"));
    sched.shutdown().await;
}

#[tokio::test]
async fn test_future_task_can_be_cancelled_before_firing() {
    let reasoning = ScriptedReasoning::actions(vec![done("never")]);
    let sched = scheduler(reasoning.clone());
    let task = ScheduledTask::new("later")
        .at(Local::now() + chrono::Duration::hours(1))
        .every(Cadence::Daily);
    let id = sched.schedule(task).unwrap();

    let state = sched.status(id).unwrap();
    assert_eq!(state.status, TaskStatus::Scheduled);
    assert!(state.next_run_at.unwrap() > Local::now());

    sched.cancel(id).unwrap();
    let state = wait_for(&sched, id, |s| s.status == TaskStatus::Cancelled).await;
    assert_eq!(state.runs, 0);
    assert!(reasoning.requests().is_empty());
    sched.shutdown().await;
}

#[tokio::test]
async fn test_repeating_task_reschedules_after_firing() {
    let sched = scheduler(ScriptedReasoning::repeating(done("tick")));
    let task = ScheduledTask::new("tick").every(Cadence::Every(Duration::from_secs(3600)));
    let id = sched.schedule(task).unwrap();

    let state = wait_for(&sched, id, |s| {
        s.runs == 1 && s.status == TaskStatus::Scheduled
    })
    .await;
    assert_eq!(state.last_outcome, Some(TaskStatus::Completed));
    let next = state.next_run_at.unwrap();
    assert!(next > Local::now() + chrono::Duration::minutes(50));
    sched.shutdown().await;
    assert_eq!(sched.status(id).unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_schedule_rejects_bad_tasks() {
    let sched = scheduler(ScriptedReasoning::actions(vec![]));

    let err = sched.schedule(ScheduledTask::new("   ")).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidSchedule(_)));

    let zero = ScheduledTask::new("q").every(Cadence::Every(Duration::ZERO));
    assert!(sched.schedule(zero).is_err());

    let endless = ScheduledTask::new("q").every(Cadence::Every(Duration::from_secs(u64::MAX)));
    assert!(sched.schedule(endless).is_err());

    let unknown = Uuid::new_v4();
    assert!(matches!(
        sched.cancel(unknown),
        Err(SchedulerError::UnknownTask(id)) if id == unknown
    ));
}
