//! The tool-calling execution loop.
//!
//! One task = one conversation driven in rounds: send the conversation to
//! the reasoning backend, execute whatever tools it requests, append the
//! results, repeat. The loop exits on a final text response, the round
//! limit, an exhausted budget reservation, cancellation, or a backend
//! failure. Budget is reserved before the
//! first round and the actual spend is committed on every exit path,
//! including cancellation — money already sent to the backend is gone
//! either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskforge_config::ExecutionConfig;
use taskforge_context::AssembledPrompt;
use taskforge_core::backend::{BackendRequest, Message, ReasoningBackend, RequestedToolCall};
use taskforge_core::error::{BackendError, Error, Result};
use taskforge_core::event::{Event, EventBus, EventKind, Severity};
use taskforge_core::task::Task;
use taskforge_core::tool::{self, ToolCall, ToolCallRecord, ToolRegistry};
use taskforge_ledger::{ActualUsage, BudgetLedger};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PREVIEW_CHARS: usize = 200;

/// How a task run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    Cancelled,
    Failed { reason: String },
}

/// The result of running one task through the loop.
#[derive(Debug)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    /// Final assistant text, empty unless completed.
    pub text: String,
    /// Completed reasoning rounds.
    pub rounds: u32,
    pub spent_usd: f64,
    pub records: Vec<ToolCallRecord>,
}

impl TaskOutcome {
    /// A failure before any round completed is an API/infrastructure
    /// failure, not evidence about the task itself, and must not feed
    /// failure circuit breakers.
    pub fn is_zero_round_failure(&self) -> bool {
        self.rounds == 0 && matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// Drives one task against the backend and tool registry.
pub struct ExecutionLoop {
    backend: Arc<dyn ReasoningBackend>,
    tools: Arc<ToolRegistry>,
    ledger: Arc<BudgetLedger>,
    bus: Arc<EventBus>,
    config: ExecutionConfig,
    /// Pool-wide lock serializing tools that touch shared state.
    sequencing_lock: Arc<Mutex<()>>,
}

impl ExecutionLoop {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        tools: Arc<ToolRegistry>,
        ledger: Arc<BudgetLedger>,
        bus: Arc<EventBus>,
        config: ExecutionConfig,
        sequencing_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            backend,
            tools,
            ledger,
            bus,
            config,
            sequencing_lock,
        }
    }

    /// Run a task to completion. The assembled prompt becomes the system
    /// message; the task payload is the opening user message.
    pub async fn run(
        &self,
        task: &Task,
        prompt: &AssembledPrompt,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let reservation = self
            .ledger
            .reserve(task.kind, self.ledger.task_reserve_usd())
            .await?;

        let mut usage = ActualUsage::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut cache: HashMap<String, String> = HashMap::new();
        let mut messages = vec![
            Message::system(prompt.text()),
            Message::user(task.payload.clone()),
        ];
        let mut budget_note_sent = false;
        let mut rounds = 0u32;

        let (status, text) = loop {
            if cancel.is_cancelled() {
                info!(task_id = %task.id, rounds, "Task cancelled");
                break (OutcomeStatus::Cancelled, String::new());
            }
            if rounds >= self.config.max_rounds {
                break (
                    OutcomeStatus::Failed {
                        reason: format!("round limit ({}) reached", self.config.max_rounds),
                    },
                    String::new(),
                );
            }

            let request = BackendRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                max_tokens: None,
                tools: self.tools.definitions(),
            };
            let response = match self.backend.complete(request).await {
                // An empty response slipping through the fallback chain is
                // transient infrastructure trouble, never a final answer.
                Ok(r) if r.is_empty() => {
                    warn!(task_id = %task.id, rounds, "Backend returned an empty response");
                    break (
                        OutcomeStatus::Failed {
                            reason: BackendError::EmptyResponse(
                                "no content and no tool calls".into(),
                            )
                            .to_string(),
                        },
                        String::new(),
                    );
                }
                Ok(r) => r,
                Err(e) => {
                    warn!(task_id = %task.id, rounds, error = %e, "Backend call failed");
                    break (
                        OutcomeStatus::Failed {
                            reason: e.to_string(),
                        },
                        String::new(),
                    );
                }
            };
            rounds += 1;

            usage.calls += 1;
            if let Some(u) = &response.usage {
                usage.cost_usd += u.cost_usd.unwrap_or(0.0);
                usage.prompt_tokens += u64::from(u.prompt_tokens);
                usage.completion_tokens += u64::from(u.completion_tokens);
            }

            let tool_calls = response.message.tool_calls.clone();
            let content = response.message.content.clone();
            messages.push(response.message);

            if tool_calls.is_empty() {
                break (OutcomeStatus::Completed, content);
            }

            // A final text answer above is still accepted; more rounds are not.
            if usage.cost_usd >= reservation.amount_usd {
                break (
                    OutcomeStatus::Failed {
                        reason: format!(
                            "budget reservation exhausted (${:.4} of ${:.4} spent)",
                            usage.cost_usd, reservation.amount_usd
                        ),
                    },
                    String::new(),
                );
            }

            let results = self
                .run_tool_batch(task, &tool_calls, &mut cache, &mut records)
                .await;
            for (call_id, output) in results {
                messages.push(Message::tool_result(call_id, output));
            }

            if !budget_note_sent && usage.cost_usd >= reservation.amount_usd / 2.0 {
                messages.push(Message::system(format!(
                    "Budget note: ${:.4} of the ${:.4} reserved for this task is spent. \
                     Prioritize finishing over further exploration.",
                    usage.cost_usd, reservation.amount_usd
                )));
                budget_note_sent = true;
            }
            if self.config.checkpoint_interval > 0 && rounds % self.config.checkpoint_interval == 0
            {
                messages.push(Message::system(format!(
                    "Checkpoint: round {rounds} of {}. Summarize progress and converge.",
                    self.config.max_rounds
                )));
            }
        };

        let snapshot = self.ledger.commit(&reservation, &usage).await?;
        debug!(
            task_id = %task.id,
            rounds,
            spent_usd = usage.cost_usd,
            budget = %snapshot.report_line(),
            "Task run finished"
        );

        Ok(TaskOutcome {
            status,
            text,
            rounds,
            spent_usd: usage.cost_usd,
            records,
        })
    }

    /// Execute one round's tool calls, preserving request order in the
    /// returned `(call_id, output)` pairs. Cached results are served without
    /// executing; a batch that is entirely read-only runs concurrently.
    async fn run_tool_batch(
        &self,
        task: &Task,
        calls: &[RequestedToolCall],
        cache: &mut HashMap<String, String>,
        records: &mut Vec<ToolCallRecord>,
    ) -> Vec<(String, String)> {
        let mut outputs: Vec<Option<String>> = vec![None; calls.len()];
        let mut to_run: Vec<usize> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            let Some(tool) = self.tools.get(&call.name) else {
                self.publish_tool_failure(task, &call.name, "unknown tool");
                outputs[i] = Some(format!("TOOL_ERROR: unknown tool '{}'", call.name));
                continue;
            };
            let fp = tool::fingerprint(&call.name, &call.arguments);
            if tool.cacheable()
                && let Some(hit) = cache.get(&fp)
            {
                records.push(ToolCallRecord {
                    tool: call.name.clone(),
                    fingerprint: fp,
                    cached: true,
                    output_preview: preview(hit),
                    started_at: Utc::now(),
                    duration_ms: 0,
                    timed_out: false,
                });
                outputs[i] = Some(hit.clone());
                continue;
            }
            to_run.push(i);
        }

        let all_read_only = to_run.iter().all(|&i| {
            self.tools
                .get(&calls[i].name)
                .is_some_and(|t| t.read_only())
        });

        let executed: Vec<(usize, Executed)> = if all_read_only && to_run.len() > 1 {
            let futures = to_run.iter().map(|&i| self.execute_one(task, &calls[i]));
            to_run
                .iter()
                .copied()
                .zip(futures::future::join_all(futures).await)
                .collect()
        } else {
            let mut done = Vec::with_capacity(to_run.len());
            for &i in &to_run {
                done.push((i, self.execute_one(task, &calls[i]).await));
            }
            done
        };

        for (i, exec) in executed {
            let output = self.truncate_output(exec.output);
            let cacheable = self
                .tools
                .get(&calls[i].name)
                .is_some_and(|t| t.cacheable());
            if exec.success && !exec.record.timed_out && cacheable {
                cache.insert(exec.record.fingerprint.clone(), output.clone());
            }
            records.push(exec.record);
            outputs[i] = Some(output);
        }

        calls
            .iter()
            .zip(outputs)
            .map(|(call, output)| (call.id.clone(), output.unwrap_or_default()))
            .collect()
    }

    async fn execute_one(&self, task: &Task, call: &RequestedToolCall) -> Executed {
        // Callers only pass names resolved by run_tool_batch.
        let Some(registered) = self.tools.get(&call.name) else {
            return Executed::failed(call, "TOOL_ERROR: tool vanished from registry".into());
        };
        // A tool's declared timeout never exceeds the configured ceiling.
        let timeout = Duration::from_secs(
            registered.timeout_secs().min(self.config.tool_timeout_secs),
        );
        let fingerprint = tool::fingerprint(&call.name, &call.arguments);
        let started_at = Utc::now();
        let started = std::time::Instant::now();

        // Tools that mutate shared state run one at a time, pool-wide.
        let _sequenced = if registered.shared_resource() {
            Some(self.sequencing_lock.lock().await)
        } else {
            None
        };

        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        };
        let (output, success, timed_out) =
            match tokio::time::timeout(timeout, self.tools.execute(&tool_call)).await {
                Ok(Ok(result)) => (result.output, result.success, false),
                Ok(Err(e)) => {
                    self.publish_tool_failure(task, &call.name, &e.to_string());
                    (format!("TOOL_ERROR: {e}"), false, false)
                }
                Err(_) => {
                    warn!(
                        task_id = %task.id,
                        tool = %call.name,
                        timeout_secs = timeout.as_secs(),
                        "Tool call timed out"
                    );
                    self.publish_tool_failure(
                        task,
                        &call.name,
                        &format!("timed out after {}s", timeout.as_secs()),
                    );
                    (
                        format!(
                            "TOOL_TIMEOUT: '{}' exceeded {}s and was abandoned. \
                             Do not retry it with the same arguments.",
                            call.name,
                            timeout.as_secs()
                        ),
                        false,
                        true,
                    )
                }
            };

        Executed {
            success,
            record: ToolCallRecord {
                tool: call.name.clone(),
                fingerprint,
                cached: false,
                output_preview: preview(&output),
                started_at,
                duration_ms: started.elapsed().as_millis() as u64,
                timed_out,
            },
            output,
        }
    }

    fn truncate_output(&self, output: String) -> String {
        let max = self.config.result_max_chars;
        let total = output.chars().count();
        if total <= max {
            return output;
        }
        let kept: String = output.chars().take(max).collect();
        format!("{kept}\n[output truncated: {} chars omitted]", total - max)
    }

    fn publish_tool_failure(&self, task: &Task, tool_name: &str, reason: &str) {
        self.bus.publish(
            Event::new(EventKind::ToolFailed {
                tool_name: tool_name.to_string(),
                reason: reason.to_string(),
            })
            .for_task(task.id)
            .with_severity(Severity::Warning),
        );
    }
}

struct Executed {
    output: String,
    success: bool,
    record: ToolCallRecord,
}

impl Executed {
    fn failed(call: &RequestedToolCall, output: String) -> Self {
        Self {
            success: false,
            record: ToolCallRecord {
                tool: call.name.clone(),
                fingerprint: tool::fingerprint(&call.name, &call.arguments),
                cached: false,
                output_preview: preview(&output),
                started_at: Utc::now(),
                duration_ms: 0,
                timed_out: false,
            },
            output,
        }
    }
}

fn preview(output: &str) -> String {
    output.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskforge_config::BudgetConfig;
    use taskforge_context::{ContextAssembler, ContextSection};
    use taskforge_core::backend::{BackendResponse, Usage};
    use taskforge_core::error::{BackendError, ToolError};
    use taskforge_core::store::FileStore;
    use taskforge_core::task::TaskKind;
    use taskforge_core::tool::{Tool, ToolResult};
    use tempfile::TempDir;

    /// Replays a scripted list of responses; the last entry repeats forever.
    /// Records every request for assertions.
    struct ScriptedBackend {
        script: StdMutex<VecDeque<BackendResponse>>,
        requests: StdMutex<Vec<BackendRequest>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<BackendResponse>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request_texts(&self, index: usize) -> Vec<String> {
            self.requests.lock().unwrap()[index]
                .messages
                .iter()
                .map(|m| m.content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: BackendRequest,
        ) -> std::result::Result<BackendResponse, BackendError> {
            self.requests.lock().unwrap().push(request);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                script
                    .front()
                    .cloned()
                    .ok_or_else(|| BackendError::Network("script exhausted".into()))
            }
        }
    }

    fn text_response(content: &str, cost_usd: f64) -> BackendResponse {
        BackendResponse {
            message: Message::assistant(content),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                cost_usd: Some(cost_usd),
            }),
            model: "test-model".into(),
        }
    }

    fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>, cost_usd: f64) -> BackendResponse {
        let mut message = Message::assistant("");
        for (id, name, arguments) in calls {
            message.tool_calls.push(RequestedToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            });
        }
        BackendResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                cost_usd: Some(cost_usd),
            }),
            model: "test-model".into(),
        }
    }

    struct CountingEchoTool {
        executions: AtomicU32,
    }

    #[async_trait]
    impl Tool for CountingEchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes its input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn cacheable(&self) -> bool {
            true
        }
        fn read_only(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult {
                call_id: "x".into(),
                success: true,
                output: format!("echo: {}", arguments["text"].as_str().unwrap_or("")),
            })
        }
    }

    /// Side-effecting (not cacheable, not read-only) counter.
    struct CountingWriteTool {
        executions: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for CountingWriteTool {
        fn name(&self) -> &str {
            "write"
        }
        fn description(&self) -> &str {
            "Writes something somewhere"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult {
                call_id: "x".into(),
                success: true,
                output: "written".into(),
            })
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(ToolResult {
                call_id: "x".into(),
                success: true,
                output: "too late".into(),
            })
        }
    }

    /// Declares a far looser timeout than any sane ceiling.
    struct PatientTool;

    #[async_trait]
    impl Tool for PatientTool {
        fn name(&self) -> &str {
            "patient"
        }
        fn description(&self) -> &str {
            "Takes its time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn timeout_secs(&self) -> u64 {
            3600
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(ToolResult {
                call_id: "x".into(),
                success: true,
                output: "too late".into(),
            })
        }
    }

    struct BigOutputTool;

    #[async_trait]
    impl Tool for BigOutputTool {
        fn name(&self) -> &str {
            "big"
        }
        fn description(&self) -> &str {
            "Produces a large output"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult {
                call_id: "x".into(),
                success: true,
                output: "z".repeat(50_000),
            })
        }
    }

    struct Harness {
        _dir: TempDir,
        ledger: Arc<BudgetLedger>,
        runner: ExecutionLoop,
        backend: Arc<ScriptedBackend>,
    }

    async fn harness(script: Vec<BackendResponse>, config: ExecutionConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let bus = Arc::new(EventBus::new(64));
        let ledger = Arc::new(
            BudgetLedger::open(store, BudgetConfig::default(), bus.clone())
                .await
                .unwrap(),
        );

        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingEchoTool {
            executions: AtomicU32::new(0),
        }));
        registry.register(Box::new(SlowTool));
        registry.register(Box::new(PatientTool));
        registry.register(Box::new(BigOutputTool));
        let tools = Arc::new(registry);

        let backend = ScriptedBackend::new(script);
        let runner = ExecutionLoop::new(
            backend.clone(),
            tools,
            ledger.clone(),
            bus,
            config,
            Arc::new(Mutex::new(())),
        );
        Harness {
            _dir: dir,
            ledger,
            runner,
            backend,
        }
    }

    fn prompt() -> AssembledPrompt {
        ContextAssembler::new(4096, None)
            .assemble(&[ContextSection::fixed("instructions", "be useful")])
            .unwrap()
    }

    #[tokio::test]
    async fn completes_on_final_text_and_commits_spend() {
        let h = harness(vec![text_response("done", 0.02)], ExecutionConfig::default()).await;
        let task = Task::new(TaskKind::User, "say done");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.rounds, 1);
        assert!((outcome.spent_usd - 0.02).abs() < 1e-9);

        let snapshot = h.ledger.snapshot().await.unwrap();
        assert!((snapshot.spent_usd - 0.02).abs() < 1e-9);
        assert!(snapshot.pending_usd.abs() < 1e-9);
    }

    #[tokio::test]
    async fn tool_round_feeds_results_back() {
        let h = harness(
            vec![
                tool_response(
                    vec![("call_1", "echo", serde_json::json!({"text": "hi"}))],
                    0.01,
                ),
                text_response("finished", 0.01),
            ],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::User, "use the echo tool");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.records.len(), 1);
        assert!(!outcome.records[0].cached);

        // The second request must contain the tool result.
        assert_eq!(h.backend.request_count(), 2);
        let texts = h.backend.request_texts(1);
        assert!(texts.iter().any(|t| t == "echo: hi"));
    }

    #[tokio::test]
    async fn identical_cacheable_calls_served_from_cache() {
        let h = harness(
            vec![
                tool_response(
                    vec![("call_1", "echo", serde_json::json!({"text": "same"}))],
                    0.01,
                ),
                tool_response(
                    vec![("call_2", "echo", serde_json::json!({"text": "same"}))],
                    0.01,
                ),
                text_response("ok", 0.01),
            ],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::User, "echo twice");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert!(!outcome.records[0].cached);
        assert!(outcome.records[1].cached);
        assert_eq!(outcome.records[0].fingerprint, outcome.records[1].fingerprint);
    }

    #[tokio::test]
    async fn side_effecting_tool_executes_every_time() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let bus = Arc::new(EventBus::new(64));
        let ledger = Arc::new(
            BudgetLedger::open(store, BudgetConfig::default(), bus.clone())
                .await
                .unwrap(),
        );
        let executions = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingWriteTool {
            executions: executions.clone(),
        }));
        let runner = ExecutionLoop::new(
            ScriptedBackend::new(vec![
                tool_response(
                    vec![("call_1", "write", serde_json::json!({"path": "a"}))],
                    0.01,
                ),
                tool_response(
                    vec![("call_2", "write", serde_json::json!({"path": "a"}))],
                    0.01,
                ),
                text_response("ok", 0.01),
            ]),
            Arc::new(registry),
            ledger,
            bus,
            ExecutionConfig::default(),
            Arc::new(Mutex::new(())),
        );

        let task = Task::new(TaskKind::User, "write the same thing twice");
        let outcome = runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        // Identical arguments, but a side-effecting tool runs both times.
        assert_eq!(executions.load(Ordering::SeqCst), 2);
        assert!(outcome.records.iter().all(|r| !r.cached));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_timeout_becomes_structured_result() {
        let h = harness(
            vec![
                tool_response(vec![("call_1", "slow", serde_json::json!({}))], 0.01),
                text_response("gave up", 0.01),
            ],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::User, "run the slow tool");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert!(outcome.records[0].timed_out);
        let texts = h.backend.request_texts(1);
        assert!(texts.iter().any(|t| t.starts_with("TOOL_TIMEOUT: 'slow'")));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_declared_timeout_capped_by_configured_ceiling() {
        let mut config = ExecutionConfig::default();
        config.tool_timeout_secs = 1;
        let h = harness(
            vec![
                tool_response(vec![("call_1", "patient", serde_json::json!({}))], 0.01),
                text_response("gave up", 0.01),
            ],
            config,
        )
        .await;
        let task = Task::new(TaskKind::User, "run the patient tool");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        // The tool asked for an hour; the ceiling cut it off after one second.
        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert!(outcome.records[0].timed_out);
        let texts = h.backend.request_texts(1);
        assert!(texts.iter().any(|t| t.starts_with("TOOL_TIMEOUT: 'patient'")));
    }

    #[tokio::test]
    async fn oversized_output_truncated_with_note() {
        let mut config = ExecutionConfig::default();
        config.result_max_chars = 1000;
        let h = harness(
            vec![
                tool_response(vec![("call_1", "big", serde_json::json!({}))], 0.01),
                text_response("ok", 0.01),
            ],
            config,
        )
        .await;
        let task = Task::new(TaskKind::User, "big output");

        h.runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        let texts = h.backend.request_texts(1);
        let tool_result = texts
            .iter()
            .find(|t| t.contains("[output truncated"))
            .unwrap();
        assert!(tool_result.contains("49000 chars omitted"));
        assert!(tool_result.len() < 1100);
    }

    #[tokio::test]
    async fn round_limit_fails_the_task() {
        let mut config = ExecutionConfig::default();
        config.max_rounds = 3;
        // Last script entry repeats: the backend asks for tools forever.
        let h = harness(
            vec![tool_response(
                vec![("call_1", "echo", serde_json::json!({"text": "loop"}))],
                0.01,
            )],
            config,
        )
        .await;
        let task = Task::new(TaskKind::Evolution, "never converges");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 3);
        match &outcome.status {
            OutcomeStatus::Failed { reason } => assert!(reason.contains("round limit")),
            other => panic!("Expected Failed, got: {other:?}"),
        }
        assert!(!outcome.is_zero_round_failure());
    }

    #[tokio::test]
    async fn cancellation_commits_partial_spend() {
        let h = harness(vec![text_response("never sent", 0.01)], ExecutionConfig::default()).await;
        let task = Task::new(TaskKind::User, "cancelled before start");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = h.runner.run(&task, &prompt(), &cancel).await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Cancelled);
        assert_eq!(outcome.rounds, 0);

        // The reservation was committed (at zero), not leaked.
        let snapshot = h.ledger.snapshot().await.unwrap();
        assert!(snapshot.pending_usd.abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_response_fails_transiently() {
        // No content, no tool calls: never a valid answer.
        let h = harness(vec![text_response("   ", 0.01)], ExecutionConfig::default()).await;
        let task = Task::new(TaskKind::Evolution, "silent backend");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_zero_round_failure());
        match &outcome.status {
            OutcomeStatus::Failed { reason } => {
                assert!(reason.contains("Empty response"), "got: {reason}");
            }
            other => panic!("Expected Failed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backend_failure_before_first_round_is_zero_round() {
        let h = harness(vec![], ExecutionConfig::default()).await;
        let task = Task::new(TaskKind::Evolution, "api is down");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_zero_round_failure());
        let snapshot = h.ledger.snapshot().await.unwrap();
        assert!(snapshot.pending_usd.abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_tool_reported_to_backend() {
        let h = harness(
            vec![
                tool_response(vec![("call_1", "nonexistent", serde_json::json!({}))], 0.01),
                text_response("ok", 0.01),
            ],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::User, "call something missing");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        let texts = h.backend.request_texts(1);
        assert!(
            texts
                .iter()
                .any(|t| t.contains("unknown tool 'nonexistent'"))
        );
    }

    #[tokio::test]
    async fn budget_note_injected_past_half_reservation() {
        // Default reserve is $0.50; a $0.30 first round crosses half of it.
        let h = harness(
            vec![
                tool_response(
                    vec![("call_1", "echo", serde_json::json!({"text": "x"}))],
                    0.3,
                ),
                text_response("ok", 0.01),
            ],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::User, "expensive round");

        h.runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        let texts = h.backend.request_texts(1);
        assert!(texts.iter().any(|t| t.starts_with("Budget note:")));
    }

    #[tokio::test]
    async fn exhausted_reservation_ends_the_run() {
        // Default reserve is $0.50; two $0.30 tool rounds blow through it.
        let h = harness(
            vec![tool_response(
                vec![("call_1", "echo", serde_json::json!({"text": "x"}))],
                0.3,
            )],
            ExecutionConfig::default(),
        )
        .await;
        let task = Task::new(TaskKind::Evolution, "spends too much");

        let outcome = h
            .runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 2);
        match &outcome.status {
            OutcomeStatus::Failed { reason } => {
                assert!(reason.contains("reservation exhausted"));
            }
            other => panic!("Expected Failed, got: {other:?}"),
        }
        // The overage is still committed as real spend.
        let snapshot = h.ledger.snapshot().await.unwrap();
        assert!((snapshot.spent_usd - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausted_budget_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let bus = Arc::new(EventBus::new(64));
        let mut budget = BudgetConfig::default();
        budget.total_usd = 0.1;
        budget.task_reserve_usd = 0.5;
        let ledger = Arc::new(
            BudgetLedger::open(store, budget, bus.clone()).await.unwrap(),
        );
        let runner = ExecutionLoop::new(
            ScriptedBackend::new(vec![text_response("unreachable", 0.0)]),
            Arc::new(ToolRegistry::new()),
            ledger,
            bus,
            ExecutionConfig::default(),
            Arc::new(Mutex::new(())),
        );

        let task = Task::new(TaskKind::User, "no budget left");
        let err = runner
            .run(&task, &prompt(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ledger(taskforge_core::error::LedgerError::Exhausted { .. })
        ));
    }
}
