//! The control loop: ask the model, guard, dispatch, feed the result back.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::actions::{ActionRegistry, Control, Dispatch, HandlerContext, merge_params};
use crate::core::directive::DirectiveParser;
use crate::core::failure_guard::{FailureGuard, FailureVerdict};
use crate::core::history::History;
use crate::core::types::{ActionResult, Params};
use crate::core::usage::{UsageTracker, extract_total_tokens};
use crate::io::audit_log::{AuditLog, timestamp_now};
use crate::io::human::Confirm;
use crate::io::llm::ModelBackend;
use crate::io::usage_log::UsageLog;

pub const BUILD_FAILURE_PROMPT: &str = "Build keeps failing. Continue? [y/n]: ";

pub fn quota_prompt(tokens: u64) -> String {
    format!("Used {tokens} tokens. Continue? [y/n]: ")
}

/// Why the loop handed control to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    TokenQuota,
    BuildFailures,
}

impl Escalation {
    fn audit_comment(self) -> &'static str {
        match self {
            Escalation::TokenQuota => "token-quota reached",
            Escalation::BuildFailures => "too many fails",
        }
    }
}

/// Operator-facing notifications emitted while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// One dispatched action, formatted for the console.
    Activity { line: String },
    Escalated {
        reason: Escalation,
        prompt: String,
        answer: String,
    },
    /// The reply could not be parsed; the loop stops after this event.
    MalformedReply { reply: String, error: String },
}

/// Reason why `ControlLoop::run` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The model requested `exit`.
    Exited,
    /// The model's reply was not a valid directive.
    MalformedDirective { error: String },
}

/// Summary of a loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub turns: u32,
    pub escalations: u32,
    /// Tokens counted since the last reset.
    pub tokens: u64,
    pub stop: LoopStop,
}

/// Everything a loop needs besides its conversation.
pub struct LoopParts<'a> {
    pub model: &'a dyn ModelBackend,
    pub human: &'a dyn Confirm,
    pub registry: ActionRegistry<'a>,
    pub audit: AuditLog,
    pub usage_log: UsageLog,
    /// Connection settings merged into every invocation.
    pub shared: Params,
    pub token_quota: u64,
    pub max_build_failures: u32,
}

/// One agent run. Owns the history, the usage tracker and the failure guard;
/// nothing else mutates them.
pub struct ControlLoop<'a> {
    model: &'a dyn ModelBackend,
    human: &'a dyn Confirm,
    registry: ActionRegistry<'a>,
    parser: DirectiveParser,
    audit: AuditLog,
    usage_log: UsageLog,
    shared: Params,
    history: History,
    usage: UsageTracker,
    failures: FailureGuard,
}

impl<'a> ControlLoop<'a> {
    pub fn new(parts: LoopParts<'a>, history: History) -> Result<Self> {
        Ok(Self {
            model: parts.model,
            human: parts.human,
            registry: parts.registry,
            parser: DirectiveParser::new()?,
            audit: parts.audit,
            usage_log: parts.usage_log,
            shared: parts.shared,
            history,
            usage: UsageTracker::new(parts.token_quota),
            failures: FailureGuard::new(parts.max_build_failures),
        })
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn failures(&self) -> &FailureGuard {
        &self.failures
    }

    /// Run turns until the model exits or sends an unparseable reply.
    ///
    /// Model transport errors, audit-log write errors and human I/O errors are
    /// fatal and returned as `Err`. Handler failures are not; they become error
    /// results the model sees on its next turn.
    #[instrument(skip_all)]
    pub fn run<F: FnMut(&LoopEvent)>(&mut self, mut on_event: F) -> Result<LoopOutcome> {
        let mut turns = 0u32;
        let mut escalations = 0u32;
        loop {
            debug!(turn = turns + 1, history = self.history.len(), "requesting model reply");
            let reply = self
                .model
                .complete(self.history.messages())
                .context("request model reply")?;
            turns += 1;
            self.usage
                .account(extract_total_tokens(&reply.metadata), &reply.content);

            if self.usage.quota_exceeded() {
                let prompt = quota_prompt(self.usage.tokens());
                let answer = self.escalate(Escalation::TokenQuota, &prompt, &mut on_event)?;
                escalations += 1;
                self.history.append_turn(&reply.content, &answer)?;
                self.usage.reset();
                continue;
            }

            let directive = match self.parser.parse(&reply.content) {
                Ok(directive) => directive,
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(error = %error, "model reply is not a directive");
                    self.audit
                        .record("error", "bad json", &Params::new(), self.usage.tokens())?;
                    on_event(&LoopEvent::MalformedReply {
                        reply: reply.content,
                        error: error.clone(),
                    });
                    return Ok(self.outcome(
                        turns,
                        escalations,
                        LoopStop::MalformedDirective { error },
                    ));
                }
            };

            let name = directive.action.name();
            on_event(&LoopEvent::Activity {
                line: self
                    .usage
                    .activity_line(&timestamp_now(), name, &directive.comment),
            });
            self.audit
                .record(name, &directive.comment, &directive.params, self.usage.tokens())?;

            let params = merge_params(&directive.params, &self.shared);
            let ctx = HandlerContext {
                usage: &self.usage,
                usage_log: &self.usage_log,
            };
            let Dispatch {
                mut result,
                control,
            } = self.registry.dispatch(&directive.action, &params, &ctx);

            if let FailureVerdict::Escalate = self.failures.observe(&directive.action, &result) {
                result = self.escalate(Escalation::BuildFailures, BUILD_FAILURE_PROMPT, &mut on_event)?;
                escalations += 1;
            }

            self.history.append_turn(&reply.content, &result)?;
            if control == Control::Exit {
                info!(turns, escalations, tokens = self.usage.tokens(), "model requested exit");
                return Ok(self.outcome(turns, escalations, LoopStop::Exited));
            }
        }
    }

    fn escalate<F: FnMut(&LoopEvent)>(
        &self,
        reason: Escalation,
        prompt: &str,
        on_event: &mut F,
    ) -> Result<ActionResult> {
        let mut params = Params::new();
        params.insert("prompt".into(), prompt.into());
        self.audit.record(
            "ask_human",
            reason.audit_comment(),
            &params,
            self.usage.tokens(),
        )?;

        info!(?reason, "escalating to human");
        let answer = self.human.confirm(prompt).context("ask human")?;
        on_event(&LoopEvent::Escalated {
            reason,
            prompt: prompt.to_string(),
            answer: answer.clone(),
        });
        Ok(ActionResult::ok().with("answer", answer))
    }

    fn outcome(&self, turns: u32, escalations: u32, stop: LoopStop) -> LoopOutcome {
        LoopOutcome {
            turns,
            escalations,
            tokens: self.usage.tokens(),
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedConfirm, ScriptedModel, directive};
    use serde_json::json;

    #[test]
    fn quota_prompt_reports_token_count() {
        assert_eq!(quota_prompt(10_001), "Used 10001 tokens. Continue? [y/n]: ");
    }

    #[test]
    fn model_failure_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::default();
        let human = ScriptedConfirm::default();
        let mut control = ControlLoop::new(
            LoopParts {
                model: &model,
                human: &human,
                registry: ActionRegistry::new(),
                audit: AuditLog::new(temp.path().join("actions.log")),
                usage_log: UsageLog::new(temp.path().join("usage.log")),
                shared: Params::new(),
                token_quota: 100,
                max_build_failures: 3,
            },
            History::seeded("rules", "url"),
        )
        .expect("loop");

        let err = control.run(|_| {}).unwrap_err();
        assert!(format!("{err:#}").contains("no more replies"));
        assert_eq!(control.history().len(), 2);
    }

    #[test]
    fn exit_without_handler_is_fed_back_and_loop_continues() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::texts([
            directive("exit", json!({}), ""),
            "stop".to_string(),
        ]);
        let human = ScriptedConfirm::default();
        let mut control = ControlLoop::new(
            LoopParts {
                model: &model,
                human: &human,
                registry: ActionRegistry::new(),
                audit: AuditLog::new(temp.path().join("actions.log")),
                usage_log: UsageLog::new(temp.path().join("usage.log")),
                shared: Params::new(),
                token_quota: 10_000,
                max_build_failures: 3,
            },
            History::seeded("rules", "url"),
        )
        .expect("loop");

        let outcome = control.run(|_| {}).expect("run");
        assert_eq!(outcome.turns, 2);
        assert!(matches!(outcome.stop, LoopStop::MalformedDirective { .. }));
        assert!(!temp.path().join("usage.log").exists());
    }
}
