//! Method-name dispatch over user and built-in handler tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use crate::envelope::Envelope;

/// A callback invoked for every inbound message carrying its method name.
///
/// `C` is the side-specific context (server session state or client send
/// handle). Handlers receive the full envelope and may perform further
/// sends through the context; they are fire-and-forget and report their own
/// failures through logging rather than return values.
#[async_trait]
pub trait MethodHandler<C>: Send + Sync {
    /// Handle one decoded message.
    async fn handle(&self, ctx: &C, msg: &Envelope);
}

/// Which table resolved a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A user-registered handler ran.
    User,
    /// A built-in protocol handler ran.
    Builtin,
    /// No handler was registered; the message was dropped with a diagnostic.
    Unknown,
}

/// Maps method names to handlers.
///
/// Resolution order: user-registered handlers first, built-in protocol
/// handlers second, then a diagnostic no-op. Exactly one handler runs per
/// message, and an unknown method never fails the connection.
pub struct HandlerTable<C> {
    user: HashMap<String, Arc<dyn MethodHandler<C>>>,
    builtin: HashMap<String, Arc<dyn MethodHandler<C>>>,
}

impl<C> HandlerTable<C> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            user: HashMap::new(),
            builtin: HashMap::new(),
        }
    }

    /// Register an application handler. Registering a reserved protocol
    /// method here overrides the built-in.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler<C> + 'static) {
        let _ = self.user.insert(method.to_string(), Arc::new(handler));
    }

    /// Register a built-in protocol handler.
    pub fn register_builtin(&mut self, method: &str, handler: impl MethodHandler<C> + 'static) {
        let _ = self.builtin.insert(method.to_string(), Arc::new(handler));
    }

    /// Whether any handler is registered for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.user.contains_key(method) || self.builtin.contains_key(method)
    }

    /// All registered method names, sorted and deduplicated.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.user.keys().chain(self.builtin.keys()).cloned().collect();
        names.sort();
        names.dedup();
        names
    }

    /// Resolve and invoke the handler for `msg`.
    pub async fn dispatch(&self, ctx: &C, msg: &Envelope) -> DispatchOutcome {
        if let Some(handler) = self.user.get(&msg.method) {
            counter!("bus_messages_total", "method" => msg.method.clone()).increment(1);
            handler.handle(ctx, msg).await;
            return DispatchOutcome::User;
        }
        if let Some(handler) = self.builtin.get(&msg.method) {
            counter!("bus_messages_total", "method" => msg.method.clone()).increment(1);
            handler.handle(ctx, msg).await;
            return DispatchOutcome::Builtin;
        }
        counter!("bus_unknown_methods_total").increment(1);
        debug!(method = %msg.method, "no handler registered for method");
        DispatchOutcome::Unknown
    }
}

impl<C> Default for HandlerTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct TraceCtx {
        calls: Mutex<Vec<String>>,
    }

    struct MarkHandler(&'static str);

    #[async_trait]
    impl MethodHandler<TraceCtx> for MarkHandler {
        async fn handle(&self, ctx: &TraceCtx, msg: &Envelope) {
            ctx.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.0, msg.method));
        }
    }

    fn envelope(method: &str) -> Envelope {
        Envelope::new(method, json!({})).unwrap()
    }

    #[tokio::test]
    async fn dispatches_user_handler() {
        let mut table = HandlerTable::new();
        table.register("say", MarkHandler("user"));
        let ctx = TraceCtx::default();

        let outcome = table.dispatch(&ctx, &envelope("say")).await;

        assert_eq!(outcome, DispatchOutcome::User);
        assert_eq!(ctx.calls.lock().unwrap().as_slice(), ["user:say"]);
    }

    #[tokio::test]
    async fn falls_back_to_builtin() {
        let mut table = HandlerTable::new();
        table.register_builtin("server_probe", MarkHandler("builtin"));
        let ctx = TraceCtx::default();

        let outcome = table.dispatch(&ctx, &envelope("server_probe")).await;

        assert_eq!(outcome, DispatchOutcome::Builtin);
        assert_eq!(ctx.calls.lock().unwrap().as_slice(), ["builtin:server_probe"]);
    }

    #[tokio::test]
    async fn user_handler_overrides_builtin() {
        let mut table = HandlerTable::new();
        table.register_builtin("server_probe", MarkHandler("builtin"));
        table.register("server_probe", MarkHandler("user"));
        let ctx = TraceCtx::default();

        let outcome = table.dispatch(&ctx, &envelope("server_probe")).await;

        assert_eq!(outcome, DispatchOutcome::User);
        assert_eq!(ctx.calls.lock().unwrap().as_slice(), ["user:server_probe"]);
    }

    #[tokio::test]
    async fn unknown_method_is_a_noop() {
        let table: HandlerTable<TraceCtx> = HandlerTable::new();
        let ctx = TraceCtx::default();

        let outcome = table.dispatch(&ctx, &envelope("nope")).await;

        assert_eq!(outcome, DispatchOutcome::Unknown);
        assert!(ctx.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exactly_one_handler_runs() {
        let mut table = HandlerTable::new();
        table.register("say", MarkHandler("user"));
        table.register_builtin("say", MarkHandler("builtin"));
        let ctx = TraceCtx::default();

        let _ = table.dispatch(&ctx, &envelope("say")).await;

        assert_eq!(ctx.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn methods_sorted_and_deduplicated() {
        let mut table: HandlerTable<TraceCtx> = HandlerTable::new();
        table.register("zeta", MarkHandler("user"));
        table.register("alpha", MarkHandler("user"));
        table.register_builtin("alpha", MarkHandler("builtin"));
        table.register_builtin("mid", MarkHandler("builtin"));

        assert_eq!(table.methods(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn has_method_checks_both_tables() {
        let mut table: HandlerTable<TraceCtx> = HandlerTable::new();
        table.register("user-only", MarkHandler("user"));
        table.register_builtin("builtin-only", MarkHandler("builtin"));

        assert!(table.has_method("user-only"));
        assert!(table.has_method("builtin-only"));
        assert!(!table.has_method("neither"));
    }
}
