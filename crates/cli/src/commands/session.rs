use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rehabdesk_agent::anthropic::AnthropicConnector;
use rehabdesk_agent::invoker::AgentInvoker;
use rehabdesk_agent::llm::BackendConnector;
use rehabdesk_agent::session::{Session, SessionError};
use rehabdesk_core::config::LoadOptions;
use rehabdesk_core::errors::ApplicationError;
use rehabdesk_core::flows::FlowState;
use rehabdesk_core::intake::{format_intake, IntakeRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::commands::intake::load_intake;
use crate::commands::CommandResult;

pub const HELP: &str = "Type an answer and press enter. Commands: /plan /regen /back /intake /quit";

const RETRY_HINT: &str = " Type /intake to reload the intake and try again.";

/// Where the intake is re-read from when the user returns to step 1.
#[derive(Clone, Debug)]
pub struct IntakeSource {
    pub path: PathBuf,
    pub image: Option<PathBuf>,
}

impl IntakeSource {
    pub fn load(&self) -> Result<IntakeRecord> {
        load_intake(&self.path, self.image.as_deref())
    }
}

pub fn run(intake_path: &Path, image: Option<&Path>, options: LoadOptions) -> CommandResult {
    let source = IntakeSource { path: intake_path.to_path_buf(), image: image.map(Path::to_path_buf) };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "session",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    let mut session = Session::new(AgentInvoker::new(AnthropicConnector::from_env(), options));
    let outcome = runtime.block_on(async {
        let input = BufReader::new(tokio::io::stdin());
        let mut output = tokio::io::stdout();
        drive(&mut session, &source, input, &mut output).await
    });

    match outcome {
        Ok(SessionEnd::Finished) => CommandResult::success(
            "session",
            format!("session {} ended at step {}", session.id(), session.state().step()),
        ),
        Ok(SessionEnd::IntakeIncomplete(note)) => {
            CommandResult::failure("session", "intake_incomplete", note, 2)
        }
        Ok(SessionEnd::IntakeLoadFailed(message)) => {
            CommandResult::failure("session", "intake_load", message, 1)
        }
        Err(error) => CommandResult::failure("session", "session_io", format!("{error:#}"), 1),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Finished,
    IntakeIncomplete(String),
    IntakeLoadFailed(String),
}

/// Runs the consult over line-oriented input until `/quit` or end of input.
pub async fn drive<C, R, W>(
    session: &mut Session<C>,
    source: &IntakeSource,
    input: R,
    output: &mut W,
) -> Result<SessionEnd>
where
    C: BackendConnector,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut intake = match source.load() {
        Ok(intake) => intake,
        Err(error) => return Ok(SessionEnd::IntakeLoadFailed(format!("{error:#}"))),
    };
    if let Some(note) = enter_interview(session, &intake, output).await? {
        return Ok(SessionEnd::IntakeIncomplete(note));
    }
    say(output, HELP).await?;

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        match line.trim() {
            "/quit" => break,
            "/plan" => {
                let result = session.generate_plan(&intake).await;
                show_plan(session, result, output).await?;
            }
            "/regen" => {
                let result = session.regenerate_plan(&intake).await;
                show_plan(session, result, output).await?;
            }
            "/back" => match session.back_to_interview() {
                Ok(()) => say(output, "Step 2: interview. Continue answering or type /plan.").await?,
                Err(error) => report(session, error, output).await?,
            },
            "/intake" => {
                if session.state() != &FlowState::Intake {
                    if let Err(error) = session.back_to_intake() {
                        report(session, error, output).await?;
                        continue;
                    }
                }
                intake = match source.load() {
                    Ok(intake) => intake,
                    Err(error) => {
                        let message = format!("{error:#}");
                        warn!(
                            event_name = "cli.session.intake_reload_failed",
                            error = %message,
                            "intake reload failed"
                        );
                        say(output, &format!("Could not reload the intake: {message}.{RETRY_HINT}"))
                            .await?;
                        continue;
                    }
                };
                if let Some(note) = enter_interview(session, &intake, output).await? {
                    return Ok(SessionEnd::IntakeIncomplete(note));
                }
            }
            message => match session.send_message(message, &intake).await {
                Ok(Some(reply)) => say(output, &format!("Assistant: {reply}")).await?,
                Ok(None) => {}
                Err(error) => report(session, error, output).await?,
            },
        }
    }

    Ok(SessionEnd::Finished)
}

/// Shows the intake and asks the first question. Returns the required-field
/// note when the intake cannot start the interview.
async fn enter_interview<C, W>(
    session: &mut Session<C>,
    intake: &IntakeRecord,
    output: &mut W,
) -> Result<Option<String>>
where
    C: BackendConnector,
    W: AsyncWrite + Unpin,
{
    say(output, &format!("Step 1: intake\n{}", format_intake(intake))).await?;

    let gate = session.intake_gate(intake);
    if let Some(note) = gate.note {
        say(output, &note).await?;
        return Ok(Some(note));
    }

    match session.start_interview(intake).await {
        Ok(reply) => say(output, &format!("Step 2: interview\nAssistant: {reply}")).await?,
        Err(error) => report(session, error, output).await?,
    }
    Ok(None)
}

async fn show_plan<C, W>(
    session: &Session<C>,
    result: Result<String, SessionError>,
    output: &mut W,
) -> Result<()>
where
    C: BackendConnector,
    W: AsyncWrite + Unpin,
{
    match result {
        Ok(plan) => say(output, &format!("Step 3: plan\n{plan}")).await,
        Err(error) => report(session, error, output).await,
    }
}

async fn report<C, W>(session: &Session<C>, error: SessionError, output: &mut W) -> Result<()>
where
    C: BackendConnector,
    W: AsyncWrite + Unpin,
{
    let at_step = session.state().clone();
    let interface = ApplicationError::from(error).into_interface(session.id().to_string());
    warn!(
        event_name = "cli.session.step_failed",
        session_id = interface.correlation_id(),
        state = ?at_step,
        error = %interface,
        "session step failed"
    );

    let hint = match at_step {
        FlowState::Intake => RETRY_HINT,
        FlowState::Plan => " Type /back to return to the interview.",
        FlowState::Interview => "",
    };
    say(output, &format!("{} {}{hint}", interface.user_message(), interface.message())).await
}

async fn say<W>(output: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(text.as_bytes()).await.context("failed to write output")?;
    output.write_all(b"\n").await.context("failed to write output")?;
    output.flush().await.context("failed to flush output")
}
