//! Observability wrapping for every physical statement.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::field::Empty;
use tracing::{Span, debug, error, trace, warn};

use crate::context::QueryContext;
use crate::error::DbError;
use crate::types::RowValues;

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(200);

/// Completion callback: final error (if any) and affected rows (for exec).
pub type Completion = Box<dyn FnOnce(Option<&DbError>, Option<usize>) + Send>;

pub trait QueryObserver: Send + Sync + fmt::Debug {
    /// Called before a statement runs; the returned callback runs once it finishes.
    fn begin(
        &self,
        ctx: Option<&QueryContext>,
        operation: &'static str,
        sql: &str,
        source: &str,
    ) -> Completion;
}

/// Default observer: one `tracing` span per statement, with slow-statement warnings.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    slow_threshold: Duration,
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self {
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

impl TracingObserver {
    #[must_use]
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }
}

impl QueryObserver for TracingObserver {
    fn begin(
        &self,
        ctx: Option<&QueryContext>,
        operation: &'static str,
        sql: &str,
        source: &str,
    ) -> Completion {
        let parent = match ctx {
            Some(ctx) => ctx.span().clone(),
            None => {
                trace!(source, "nil context, forget call with_context?");
                Span::current()
            }
        };
        let span = tracing::debug_span!(
            parent: &parent,
            "sql",
            operation,
            sql = %sql,
            source = %source,
            exec_rows = Empty,
            duration_ms = Empty,
        );
        let start = Instant::now();
        let slow_threshold = self.slow_threshold;

        Box::new(move |err, rows| {
            let elapsed = start.elapsed();
            span.record(
                "duration_ms",
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            if let Some(rows) = rows {
                span.record("exec_rows", rows);
            }
            let _entered = span.enter();
            match err {
                Some(err) => error!(error = %err, "sql failed"),
                None if elapsed >= slow_threshold => warn!("slow sql"),
                None => debug!("sql"),
            }
        })
    }
}

/// Inline bound values into a statement for display. Never sent to a driver.
#[must_use]
pub fn render_sql(sql: &str, params: &[RowValues]) -> String {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut chars = sql.chars().peekable();
    let mut next = 0;
    let mut in_quote = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                out.push(c);
            }
            '?' if !in_quote => {
                match params.get(next) {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => out.push('?'),
                }
                next += 1;
            }
            '$' if !in_quote && chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let value = digits
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| params.get(i));
                match value {
                    Some(value) => out.push_str(&value.to_sql_literal()),
                    None => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}
