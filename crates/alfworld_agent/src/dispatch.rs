//! Ordered turn-handler strategies.
//!
//! Each side of the conversation owns a [`TurnDispatcher`] holding an explicit
//! list of handlers. The dispatcher asks them in order and the first one that
//! answers produces the reply.

use std::error::Error;
use std::fmt;

use crate::conversation::{is_termination_message, Message, TERMINATE_REPLY};
use crate::environment::EnvError;
use crate::llm::LlmClientError;

pub const TERMINATE_NOTICE_PHRASE: &str = "now reply TERMINATE";

/// A reply produced by one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReply {
    pub content: String,
    /// The conversation stops once this reply is delivered.
    pub ends_conversation: bool,
}

impl HandlerReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ends_conversation: false,
        }
    }

    pub fn closing(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ends_conversation: true,
        }
    }
}

/// One reply strategy over a session state `S`.
pub trait TurnHandler<S> {
    fn name(&self) -> &'static str;

    /// Returns `Ok(None)` to let the next handler answer.
    fn handle(&self, state: &mut S, history: &[Message]) -> Result<Option<HandlerReply>, TurnError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub handler: &'static str,
    pub reply: HandlerReply,
}

pub struct TurnDispatcher<S> {
    name: &'static str,
    handlers: Vec<Box<dyn TurnHandler<S>>>,
}

impl<S> fmt::Debug for TurnDispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnDispatcher")
            .field("name", &self.name)
            .field("handlers", &self.handler_names())
            .finish()
    }
}

impl<S> TurnDispatcher<S> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Vec::new(),
        }
    }

    /// Appends a handler; it runs after every handler added before it.
    pub fn with_handler(mut self, handler: impl TurnHandler<S> + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn push(&mut self, handler: Box<dyn TurnHandler<S>>) {
        self.handlers.push(handler);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    pub fn dispatch(&self, state: &mut S, history: &[Message]) -> Result<Dispatched, TurnError> {
        for handler in &self.handlers {
            if let Some(reply) = handler.handle(state, history)? {
                tracing::trace!(
                    dispatcher = self.name,
                    handler = handler.name(),
                    "handler produced reply"
                );
                return Ok(Dispatched {
                    handler: handler.name(),
                    reply,
                });
            }
        }
        Err(TurnError::Unhandled {
            dispatcher: self.name,
        })
    }
}

// ============================================================================
// Termination handlers
// ============================================================================

/// Environment side: an incoming message asking to terminate ends the
/// conversation with `TERMINATE`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminationRequestHandler;

impl<S> TurnHandler<S> for TerminationRequestHandler {
    fn name(&self) -> &'static str {
        "termination_request"
    }

    fn handle(&self, _state: &mut S, history: &[Message]) -> Result<Option<HandlerReply>, TurnError> {
        Ok(history
            .last()
            .filter(|message| is_termination_message(&message.content))
            .map(|_| HandlerReply::closing(TERMINATE_REPLY)))
    }
}

/// Assistant side: answers a "now reply TERMINATE" notice without calling
/// the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminateNoticeHandler;

impl<S> TurnHandler<S> for TerminateNoticeHandler {
    fn name(&self) -> &'static str {
        "terminate_notice"
    }

    fn handle(&self, _state: &mut S, history: &[Message]) -> Result<Option<HandlerReply>, TurnError> {
        Ok(history
            .last()
            .filter(|message| message.content.contains(TERMINATE_NOTICE_PHRASE))
            .map(|_| HandlerReply::text(TERMINATE_REPLY)))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum TurnError {
    Unhandled { dispatcher: &'static str },
    EmptyHistory,
    Environment(EnvError),
    Llm(LlmClientError),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Unhandled { dispatcher } => {
                write!(f, "no handler replied in dispatcher {dispatcher}")
            }
            TurnError::EmptyHistory => write!(f, "no message to reply to"),
            TurnError::Environment(err) => write!(f, "environment error: {err}"),
            TurnError::Llm(err) => write!(f, "llm error: {err}"),
        }
    }
}

impl Error for TurnError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TurnError::Environment(err) => Some(err),
            TurnError::Llm(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EnvError> for TurnError {
    fn from(err: EnvError) -> Self {
        TurnError::Environment(err)
    }
}

impl From<LlmClientError> for TurnError {
    fn from(err: LlmClientError) -> Self {
        TurnError::Llm(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        calls: Vec<&'static str>,
    }

    struct Fixed(&'static str, Option<&'static str>);

    impl TurnHandler<Counter> for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handle(
            &self,
            state: &mut Counter,
            _history: &[Message],
        ) -> Result<Option<HandlerReply>, TurnError> {
            state.calls.push(self.0);
            Ok(self.1.map(HandlerReply::text))
        }
    }

    #[test]
    fn first_answering_handler_wins_in_order() {
        let dispatcher = TurnDispatcher::new("test")
            .with_handler(Fixed("skip", None))
            .with_handler(Fixed("answer", Some("hi")))
            .with_handler(Fixed("never", Some("late")));
        let mut state = Counter::default();

        let dispatched = dispatcher
            .dispatch(&mut state, &[Message::user("hello")])
            .unwrap();

        assert_eq!(dispatched.handler, "answer");
        assert_eq!(dispatched.reply.content, "hi");
        assert_eq!(state.calls, vec!["skip", "answer"]);
        assert_eq!(dispatcher.handler_names(), vec!["skip", "answer", "never"]);
    }

    #[test]
    fn silent_dispatcher_reports_unhandled() {
        let dispatcher = TurnDispatcher::new("empty").with_handler(Fixed("skip", None));
        let err = dispatcher
            .dispatch(&mut Counter::default(), &[Message::user("hello")])
            .unwrap_err();
        assert!(matches!(err, TurnError::Unhandled { dispatcher: "empty" }));
    }

    #[test]
    fn termination_request_closes_conversation() {
        let reply = TerminationRequestHandler
            .handle(&mut (), &[Message::assistant("Done. TERMINATE")])
            .unwrap()
            .unwrap();
        assert_eq!(reply, HandlerReply::closing("TERMINATE"));

        let none = TerminationRequestHandler
            .handle(&mut (), &[Message::assistant("Action: look")])
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn terminate_notice_is_case_sensitive_phrase() {
        let reply = TerminateNoticeHandler
            .handle(&mut (), &[Message::user("Observation: Task failed, now reply TERMINATE.")])
            .unwrap();
        assert_eq!(reply, Some(HandlerReply::text("TERMINATE")));

        let none = TerminateNoticeHandler
            .handle(&mut (), &[Message::user("Observation: you terminate nothing")])
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn handlers_ignore_empty_history() {
        assert_eq!(TerminationRequestHandler.handle(&mut (), &[]).unwrap(), None);
        assert_eq!(TerminateNoticeHandler.handle(&mut (), &[]).unwrap(), None);
    }
}
