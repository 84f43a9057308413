use crate::cli::{RunArgs, ScheduleArgs, StateArgs, TargetArgs};
use crate::utils::parse_time;
use anyhow::{Context, Result};
use colored::*;
use deskpilot::{
    format_snapshot_summary, Cadence, CallbackSink, CancellationToken, Pilot, RunOptions,
    RunOutcome, RunReport, ScheduledTask, Scheduler, StatusEvent, StatusPhase, TaskStatus,
    Termination,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

impl TargetArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            use_vision: self.vision,
            target_app: self.app.clone(),
            max_steps: None,
        }
    }
}

fn print_event(event: &StatusEvent) {
    let step = format!("[{:>2}]", event.step).dimmed();
    let line = match event.phase {
        StatusPhase::Thinking => event.message.cyan(),
        StatusPhase::ToolUse => {
            let name = event.action_name.as_deref().unwrap_or("action");
            format!("{} {}", name.bold(), event.message).yellow()
        }
        StatusPhase::ToolResult => event.message.normal(),
        StatusPhase::Status => event.message.bold(),
    };
    println!("{step} {line}");
}

fn print_report(report: &RunReport) {
    let badge = match report.termination {
        Termination::Done => "✓ done".green().bold(),
        Termination::Exhausted => "… exhausted".yellow().bold(),
        Termination::Fatal => "✗ fatal".red().bold(),
        Termination::Cancelled => "■ cancelled".dimmed().bold(),
    };
    println!();
    println!("{} after {} step(s)", badge, report.steps_taken());
    println!("{}", report.summary);
}

/// Cancel `token` on the first Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling...".yellow());
            token.cancel();
        }
    });
}

/// One answer line; `None` on EOF, an empty line or cancellation.
async fn ask_user<R: AsyncBufRead + Unpin>(
    input: &mut Lines<R>,
    question: &str,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    println!();
    println!("{} {}", "?".magenta().bold(), question.bold());
    println!("{}", "(empty line gives up)".dimmed());

    let line = tokio::select! {
        line = input.next_line() => line.context("reading answer")?,
        _ = cancel.cancelled() => None,
    };
    Ok(line
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty()))
}

/// Returns whether the run finished as done.
pub async fn handle_run(pilot: Pilot, args: RunArgs) -> Result<bool> {
    let pilot = pilot.with_sink(Arc::new(CallbackSink(print_event)));
    let mut options = args.target.options();
    options.max_steps = args.max_steps;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    // One reader for the whole run so buffered answers are not lost.
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut run = pilot.start(args.query.as_str(), options, cancel.clone());
    let report = loop {
        match run.drive().await {
            RunOutcome::Finished(report) => break report,
            RunOutcome::Suspended(suspended) => {
                let answer = ask_user(&mut input, suspended.question(), &cancel).await?;
                match answer {
                    Some(answer) => run = suspended.provide_answer(answer),
                    None => break suspended.cancel(),
                }
            }
        }
    };

    print_report(&report);
    if let Some(path) = &args.transcript {
        report
            .transcript
            .write_to(path)
            .with_context(|| format!("writing transcript to {}", path.display()))?;
        info!("transcript written to {}", path.display());
    }
    Ok(report.termination == Termination::Done)
}

pub async fn handle_state(pilot: Pilot, args: StateArgs) -> Result<()> {
    let snapshot = pilot
        .session()
        .get_state(args.target.vision, args.target.app.as_deref())
        .await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    } else {
        println!("{}", format_snapshot_summary(&snapshot));
    }
    Ok(())
}

pub async fn handle_schedule(pilot: Pilot, args: ScheduleArgs) -> Result<()> {
    let mut task = ScheduledTask::new(args.query.as_str()).with_options(args.target.options());
    if let Some(at) = &args.at {
        task = task.at(parse_time(at)?);
    }
    let repeating = args.every.is_some();
    if let Some(every) = &args.every {
        task = task.every(every.parse::<Cadence>()?);
    }

    let scheduler = Scheduler::new(pilot);
    let id = scheduler.schedule(task)?;
    if let Some(state) = scheduler.status(id) {
        let next = state
            .next_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "now".to_string());
        println!("{} task {} next run {}", "✓".green(), id, next.bold());
    }
    println!("{}", "Press Ctrl+C to stop.".dimmed());

    let mut rx = scheduler.subscribe();
    let mut last_seen = None;
    loop {
        let state = rx.borrow_and_update().get(&id).cloned();
        if let Some(state) = state {
            let key = (state.status, state.runs);
            if last_seen != Some(key) {
                last_seen = Some(key);
                let status = match state.status {
                    TaskStatus::Completed => state.status.to_string().green(),
                    TaskStatus::Failed => state.status.to_string().red(),
                    TaskStatus::Running => state.status.to_string().cyan(),
                    _ => state.status.to_string().normal(),
                };
                println!("{} {} (runs: {})", "task".dimmed(), status, state.runs);
                if let Some(error) = &state.last_error {
                    println!("  {}", error.red());
                }
                let finished = matches!(
                    state.status,
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
                );
                if finished && !repeating {
                    break;
                }
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    warn!("scheduler status feed closed");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "Stopping scheduler...".yellow());
                break;
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
