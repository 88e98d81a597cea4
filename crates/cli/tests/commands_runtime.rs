use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use rehabdesk_agent::invoker::AgentInvoker;
use rehabdesk_agent::llm::{
    BackendConnector, BackendError, BackendRequest, LlmBackend, ResponseEvent,
};
use rehabdesk_agent::session::Session;
use rehabdesk_cli::commands::session::{drive, IntakeSource, SessionEnd};
use rehabdesk_cli::commands::{config, intake};
use rehabdesk_core::config::LoadOptions;
use rehabdesk_core::flows::FlowState;
use serde_json::Value;
use tempfile::TempDir;

const COMPLETE_INTAKE: &str = "\
sport: soccer
injury_region: ankle
injury_type: lateral ankle sprain
onset_type: acute trauma
time_since_injury: 3 days
pain_score: 12
symptoms: [swelling, swelling, unable-to-bear-weight]
training_goal: return to matches in 4 weeks
";

#[test]
fn intake_reports_complete_record() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(&dir, "athlete.yaml", COMPLETE_INTAKE);

    let result = intake::run(&path, true);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["can_start"], true);
    assert_eq!(payload["red_flags"], serde_json::json!(["unable to bear weight"]));
    let block = payload["intake_block"].as_str().expect("intake block");
    assert!(block.contains("Pain score (0-10): 10"));
    assert!(block.contains("Symptoms: swelling, unable to bear weight"));
}

#[test]
fn intake_with_missing_fields_exits_with_code_two() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(&dir, "athlete.yaml", "sport: rugby\ninjury_region: shoulder\n");

    let result = intake::run(&path, false);
    assert_eq!(result.exit_code, 2);
    assert!(result.output.contains(
        "Please complete required fields: injury type, onset type, time since injury, training goal"
    ));
}

#[test]
fn intake_lists_catalogue_hints_for_unlisted_choices() {
    let dir = TempDir::new().expect("tempdir");
    let body = COMPLETE_INTAKE.replace("onset_type: acute trauma", "onset_type: gradual");
    let path = write_file(&dir, "athlete.yaml", &body);

    let result = intake::run(&path, true);
    assert_eq!(result.exit_code, 0);

    let payload = parse_payload(&result.output);
    let hints = payload["catalogue_hints"].as_array().expect("hints");
    assert_eq!(hints.len(), 1);
    assert_eq!(
        hints[0],
        "onset type `gradual` is not a listed option (acute trauma, overuse, unsure)"
    );

    let human = intake::run(&path, false);
    assert!(human.output.contains("\nhint: onset type `gradual` is not a listed option"));
}

#[test]
fn intake_load_failure_is_structured() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_file(&dir, "athlete.yaml", "symptoms: [not-a-symptom]\n");

    let result = intake::run(&path, false);
    assert_eq!(result.exit_code, 1);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "intake");
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "intake_load");
}

#[test]
fn config_shows_sources_and_redacts_key() {
    let dir = TempDir::new().expect("tempdir");
    let config_path = write_file(&dir, "config.local.yaml", "api_key: sk-file-secret\nmax_tokens: 900\n");

    with_env(&[("BIGMODEL_MODEL", "glm-env")], || {
        let output = config::run(LoadOptions {
            config_path: Some(config_path.clone()),
            ..LoadOptions::default()
        });

        assert!(output.starts_with("effective config"));
        assert!(output.contains("- api_key = sk-*** (source: file ("));
        assert!(!output.contains("sk-file-secret"));
        assert!(output.contains("- model = glm-env (source: env (BIGMODEL_MODEL))"));
        assert!(output.contains("- max_tokens = 900 (source: file ("));
        assert!(output.contains("- max_image_bytes = 8000000 (source: default)"));
    });
}

#[test]
fn session_runs_interview_and_plan() {
    let dir = TempDir::new().expect("tempdir");
    let intake_path = write_file(&dir, "athlete.yaml", COMPLETE_INTAKE);
    let config_path = write_file(&dir, "config.local.yaml", "api_key: sk-test\n");

    with_env(&[], || {
        let connector =
            ScriptedConnector::with_replies(&["Can you walk?", "Any numbness?", "Seek care first."]);
        let mut session = Session::new(AgentInvoker::new(
            connector.clone(),
            LoadOptions { config_path: Some(config_path.clone()), ..LoadOptions::default() },
        ));
        let source = IntakeSource { path: intake_path.clone(), image: None };
        let input: &[u8] = b"Only with a limp\n\n/plan\n/quit\nignored after quit\n";
        let mut output = Vec::new();

        let end = block_on(drive(&mut session, &source, input, &mut output)).expect("drive");
        let output = String::from_utf8(output).expect("utf8 output");

        assert_eq!(end, SessionEnd::Finished);
        assert_eq!(session.state(), &FlowState::Plan);
        assert_eq!(session.history().len(), 3);
        assert!(output.contains("Step 2: interview\nAssistant: Can you walk?"));
        assert!(output.contains("Assistant: Any numbness?"));
        assert!(output.contains("Step 3: plan\nSeek care first."));

        let requests = connector.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].prompt.contains("URGENT: red-flag symptoms reported (unable to bear weight)"));
    });
}

#[test]
fn session_reports_blocked_plan_and_keeps_going() {
    let dir = TempDir::new().expect("tempdir");
    let intake_path = write_file(&dir, "athlete.yaml", COMPLETE_INTAKE);
    let config_path = write_file(&dir, "config.local.yaml", "api_key: sk-test\n");

    with_env(&[], || {
        let connector = ScriptedConnector::with_replies(&["Where does it hurt?"]);
        let mut session = Session::new(AgentInvoker::new(
            connector.clone(),
            LoadOptions { config_path: Some(config_path.clone()), ..LoadOptions::default() },
        ));
        let source = IntakeSource { path: intake_path.clone(), image: None };
        let input: &[u8] = b"/plan\n/regen\n";
        let mut output = Vec::new();

        let end = block_on(drive(&mut session, &source, input, &mut output)).expect("drive");
        let output = String::from_utf8(output).expect("utf8 output");

        assert_eq!(end, SessionEnd::Finished);
        assert_eq!(session.state(), &FlowState::Interview);
        assert!(output.contains("answer the follow-up questions first"));
        assert!(output.contains("invalid transition from Interview using event RegeneratePlan"));
        assert_eq!(connector.requests().len(), 1);
    });
}

#[test]
fn session_stops_on_incomplete_intake() {
    let dir = TempDir::new().expect("tempdir");
    let intake_path = write_file(&dir, "athlete.yaml", "sport: swimming\n");

    with_env(&[], || {
        let connector = ScriptedConnector::default();
        let mut session = Session::new(AgentInvoker::new(connector.clone(), LoadOptions::default()));
        let source = IntakeSource { path: intake_path.clone(), image: None };
        let mut output = Vec::new();

        let end = block_on(drive(&mut session, &source, &b""[..], &mut output)).expect("drive");

        assert!(matches!(end, SessionEnd::IntakeIncomplete(note) if note.contains("injury region")));
        assert_eq!(session.state(), &FlowState::Intake);
        assert!(connector.requests().is_empty());
    });
}

#[test]
fn session_retries_first_question_after_backend_failure() {
    let dir = TempDir::new().expect("tempdir");
    let intake_path = write_file(&dir, "athlete.yaml", COMPLETE_INTAKE);
    let config_path = write_file(&dir, "config.local.yaml", "api_key: sk-test\n");

    with_env(&[], || {
        let connector =
            ScriptedConnector::failing_once_then(&["Can you walk?", "Any numbness?", "Plan ready."]);
        let mut session = Session::new(AgentInvoker::new(
            connector.clone(),
            LoadOptions { config_path: Some(config_path.clone()), ..LoadOptions::default() },
        ));
        let source = IntakeSource { path: intake_path.clone(), image: None };
        let input: &[u8] = b"my ankle\n/intake\nOnly with a limp\n/plan\n";
        let mut output = Vec::new();

        let end = block_on(drive(&mut session, &source, input, &mut output)).expect("drive");
        let output = String::from_utf8(output).expect("utf8 output");

        assert_eq!(end, SessionEnd::Finished);
        assert_eq!(session.state(), &FlowState::Plan);
        assert!(output.contains("Please retry shortly."));
        assert!(output.contains("Type /intake to reload the intake and try again."));
        assert!(output.contains("invalid transition from Intake using event SubmitReply"));
        assert!(output.contains("Step 2: interview\nAssistant: Can you walk?"));
        assert!(output.contains("Step 3: plan\nPlan ready."));
        assert_eq!(connector.requests().len(), 4);
    });
}

#[test]
fn session_reports_unreadable_intake_as_load_failure() {
    let dir = TempDir::new().expect("tempdir");

    with_env(&[], || {
        let connector = ScriptedConnector::default();
        let mut session = Session::new(AgentInvoker::new(connector.clone(), LoadOptions::default()));
        let source = IntakeSource { path: dir.path().join("missing.yaml"), image: None };
        let mut output = Vec::new();

        let end = block_on(drive(&mut session, &source, &b""[..], &mut output)).expect("drive");

        assert!(matches!(
            end,
            SessionEnd::IntakeLoadFailed(message) if message.contains("failed to read intake file")
        ));
        assert!(connector.requests().is_empty());
    });
}

#[derive(Clone, Default)]
struct ScriptedConnector {
    replies: Arc<Mutex<VecDeque<Result<String, BackendError>>>>,
    requests: Arc<Mutex<Vec<BackendRequest>>>,
}

impl ScriptedConnector {
    fn with_replies(replies: &[&str]) -> Self {
        let connector = Self::default();
        connector
            .replies
            .lock()
            .expect("replies lock")
            .extend(replies.iter().map(|reply| Ok(reply.to_string())));
        connector
    }

    fn failing_once_then(replies: &[&str]) -> Self {
        let connector = Self::default();
        {
            let mut queue = connector.replies.lock().expect("replies lock");
            queue.push_back(Err(BackendError::Transport("connection refused".to_string())));
            queue.extend(replies.iter().map(|reply| Ok(reply.to_string())));
        }
        connector
    }

    fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl BackendConnector for ScriptedConnector {
    fn connect(
        &self,
        _config: &rehabdesk_core::config::RuntimeConfig,
    ) -> Result<Box<dyn LlmBackend>, BackendError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl LlmBackend for ScriptedConnector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn query(
        &self,
        request: BackendRequest,
        events: tokio::sync::mpsc::Sender<ResponseEvent>,
    ) -> Result<(), BackendError> {
        self.requests.lock().expect("requests lock").push(request);
        let reply =
            self.replies.lock().expect("replies lock").pop_front().unwrap_or_else(|| Ok(String::new()));
        let _ = events.send(ResponseEvent::Plain(reply?)).await;
        Ok(())
    }
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(future)
}

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ANTHROPIC_API_KEY",
        "ZHIPUAI_API_KEY",
        "BIGMODEL_BASE_URL",
        "BIGMODEL_MODEL",
        "BIGMODEL_MAX_TOKENS",
        "BIGMODEL_MAX_IMAGE_BYTES",
        "REHABDESK_LANGUAGE",
        "REHABDESK_LOG_LEVEL",
        "REHABDESK_LOG_FORMAT",
        "RECOVERY_CONFIG_PATH",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
