//! Compilation diagnostics sink.
//!
//! Threaded explicitly through emission; errors accumulate so a
//! single pass can report more than one problem. A program whose
//! context holds any error is invalid.

use thiserror::Error;

/// One diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ERROR: line {line}: '{token}' : {reason}")]
pub struct Diagnostic {
    /// Source line the diagnostic refers to.
    pub line: u32,
    /// What went wrong.
    pub reason: String,
    /// The offending token or name.
    pub token: String,
}

/// Diagnostics collected during one compilation.
#[derive(Debug, Default)]
pub struct CompileContext {
    diagnostics: Vec<Diagnostic>,
}

impl CompileContext {
    /// An empty context.
    pub fn new() -> CompileContext {
        CompileContext::default()
    }

    /// Records an error and keeps compiling.
    pub fn error(&mut self, line: u32, reason: &str, token: &str) {
        log::debug!("semantic error at line {}: {} ({})", line, reason, token);
        self.diagnostics.push(Diagnostic {
            line,
            reason: reason.to_owned(),
            token: token.to_owned(),
        });
    }

    /// Number of errors recorded.
    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// Whether compilation stayed clean.
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// The recorded diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_accumulate() {
        let mut context = CompileContext::new();
        assert!(context.is_valid());

        context.error(4, "function definition not found", "foo(");
        context.error(9, "Varyings packing failed: Too many varyings", "fragment shader");

        assert_eq!(context.error_count(), 2);
        assert!(!context.is_valid());
        assert_eq!(
            context.diagnostics()[0].to_string(),
            "ERROR: line 4: 'foo(' : function definition not found"
        );
    }
}
