//! Session handlers: `ask_human` and `exit`.

use anyhow::Result;
use tracing::warn;

use crate::actions::{ActionHandler, Dispatch, HandlerContext, optional_str};
use crate::core::types::{ActionResult, Params};
use crate::io::human::Confirm;

pub const DEFAULT_HUMAN_PROMPT: &str = "Continue? [y/n]: ";

pub struct AskHuman<H> {
    human: H,
}

impl<H: Confirm> AskHuman<H> {
    pub fn new(human: H) -> Self {
        Self { human }
    }
}

impl<H: Confirm> ActionHandler for AskHuman<H> {
    fn handle(&self, params: &Params, _ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let prompt = optional_str(params, "prompt").unwrap_or(DEFAULT_HUMAN_PROMPT);
        let answer = self.human.confirm(prompt)?;
        Ok(ActionResult::ok().with("answer", answer).into())
    }
}

/// Write the usage summary and stop the loop.
pub struct ExitRun;

impl ActionHandler for ExitRun {
    fn handle(&self, _params: &Params, ctx: &HandlerContext<'_>) -> Result<Dispatch> {
        let result = match ctx.usage_log.finalize(ctx.usage) {
            Ok(()) => ActionResult::ok(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to write usage summary");
                ActionResult::error(format!("{err:#}"))
            }
        };
        Ok(Dispatch::exit(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Control, params_of};
    use crate::core::usage::UsageTracker;
    use crate::io::usage_log::UsageLog;
    use serde_json::json;
    use std::cell::RefCell;

    struct Echo {
        answer: &'static str,
        prompts: RefCell<Vec<String>>,
    }

    impl Confirm for Echo {
        fn confirm(&self, prompt: &str) -> Result<String> {
            self.prompts.borrow_mut().push(prompt.to_string());
            Ok(self.answer.to_string())
        }
    }

    fn context_for<'a>(usage: &'a UsageTracker, usage_log: &'a UsageLog) -> HandlerContext<'a> {
        HandlerContext { usage, usage_log }
    }

    #[test]
    fn ask_human_uses_given_or_default_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let usage = UsageTracker::default();
        let usage_log = UsageLog::new(temp.path().join("usage.log"));
        let ctx = context_for(&usage, &usage_log);
        let human = Echo {
            answer: "y",
            prompts: RefCell::new(Vec::new()),
        };
        let handler = AskHuman::new(&human);

        let dispatch = handler
            .handle(&params_of(json!({"prompt": "Ship it?"})), &ctx)
            .expect("ask");
        assert_eq!(dispatch.result, ActionResult::ok().with("answer", "y"));
        handler.handle(&Params::new(), &ctx).expect("ask");

        assert_eq!(*human.prompts.borrow(), vec!["Ship it?", DEFAULT_HUMAN_PROMPT]);
    }

    #[test]
    fn exit_writes_summary_then_stops() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut usage = UsageTracker::default();
        usage.account(Some(57), "");
        let usage_log = UsageLog::new(temp.path().join("logs/usage.log"));

        let dispatch = ExitRun
            .handle(&Params::new(), &context_for(&usage, &usage_log))
            .expect("exit");

        assert_eq!(dispatch.control, Control::Exit);
        assert!(!dispatch.result.is_error());
        let summary = std::fs::read_to_string(usage_log.path()).expect("usage log");
        assert!(summary.contains("| tok=57"));
    }

    #[test]
    fn exit_still_stops_when_summary_cannot_be_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").expect("write");
        let usage = UsageTracker::default();
        let usage_log = UsageLog::new(blocker.join("usage.log"));

        let dispatch = ExitRun
            .handle(&Params::new(), &context_for(&usage, &usage_log))
            .expect("exit");

        assert_eq!(dispatch.control, Control::Exit);
        assert!(dispatch.result.is_error());
    }
}
