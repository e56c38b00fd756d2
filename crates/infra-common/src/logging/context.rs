use std::collections::BTreeMap;
use std::fmt;
use tracing::{Level, Span};

/// Context information attached to log output of a component
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Component that is generating the log
    pub component: &'static str,
    /// Operation or action being performed
    pub operation: Option<String>,
    /// Additional contextual fields
    pub fields: BTreeMap<String, String>,
}

impl LogContext {
    /// Create a new log context with just the component name
    pub fn new(component: &'static str) -> Self {
        LogContext {
            component,
            operation: None,
            fields: BTreeMap::new(),
        }
    }

    /// Create a new log context with component and operation
    pub fn with_operation<T: Into<String>>(component: &'static str, operation: T) -> Self {
        LogContext {
            component,
            operation: Some(operation.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field to the context
    pub fn with_field<S: Into<String>, T: Into<String>>(mut self, key: S, value: T) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Create a span carrying this context.
    ///
    /// Only DEBUG and INFO spans are distinguished; other levels map to the
    /// closest of the two.
    pub fn span(&self, level: Level) -> Span {
        let operation = self.operation.as_deref().unwrap_or("-");
        let fields = self.to_string();
        if level <= Level::INFO {
            tracing::info_span!("callwatch", component = self.component, operation, ctx = %fields)
        } else {
            tracing::debug_span!("callwatch", component = self.component, operation, ctx = %fields)
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.component)?;

        if let Some(op) = &self.operation {
            write!(f, "[{}]", op)?;
        }

        for (key, value) in &self.fields {
            write!(f, "[{}={}]", key, value)?;
        }

        Ok(())
    }
}
