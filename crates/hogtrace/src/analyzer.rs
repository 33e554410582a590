//! Semantic analysis (spec §4.2).
//!
//! Runs after parsing and before constant-pool/bytecode lowering. Catches
//! the structural mistakes the grammar alone can't rule out: unknown frame
//! variables, mixed positional/named capture arguments, duplicate capture
//! names, and degenerate `sample` ratios.
//!
//! `$req.x`/`$request.x` canonicalization (rule 5) and the non-negative
//! probe-point offset invariant (rule 4) are both already enforced
//! structurally by [`crate::parser`] — the parser only ever builds a
//! [`crate::ast::Expr::RequestVar`] holding the bare slot name (so both
//! spellings collapse to the same AST node), and its integer literals can
//! never be negative. There is nothing left for the analyzer to check for
//! those two rules; they are listed here for traceability against spec
//! §4.2, not re-implemented.

use std::collections::HashSet;

use crate::ast::{AstProbe, AstProgram, Expr, ProbeTarget, Stmt};
use crate::error::CompileError;

/// Checks whether `name` is one of the host-provided frame variables spec
/// §3 lists as visible "at minimum" for the given probe point, or the
/// reserved per-request sampling verdict (spec §4.5).
///
/// Real hosts may expose more than this; this is the core's conservative,
/// host-neutral baseline, not a hard ceiling a given host is required to
/// respect beyond what it chooses to honor through the dispatcher.
#[must_use]
pub fn is_known_frame_name(name: &str, target: ProbeTarget) -> bool {
    if name == crate::vm::SAMPLE_OK_IDENT {
        return true;
    }
    if matches!(name, "args" | "kwargs" | "self") {
        return true;
    }
    if let Some(digits) = name.strip_prefix("arg") {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return true;
        }
    }
    if matches!(target, ProbeTarget::Exit | ProbeTarget::ExitOffset(_)) && matches!(name, "retval" | "exception") {
        return true;
    }
    false
}

pub fn analyze(program: &AstProgram) -> Result<(), CompileError> {
    for probe in &program.probes {
        analyze_probe(probe)?;
    }
    Ok(())
}

fn analyze_probe(probe: &AstProbe) -> Result<(), CompileError> {
    if let Some(predicate) = &probe.predicate {
        check_identifiers(predicate, probe.spec.target)?;
    }
    for stmt in &probe.body {
        match stmt {
            Stmt::RequestAssign { value, .. } => check_identifiers(value, probe.spec.target)?,
            Stmt::Sample { rate, at } => check_sample_rate(*rate, *at)?,
            Stmt::Capture { args, at } => {
                let mut named = HashSet::new();
                let mut saw_positional = false;
                let mut saw_named = false;
                for arg in args {
                    check_identifiers(&arg.value, probe.spec.target)?;
                    match &arg.name {
                        Some(name) => {
                            saw_named = true;
                            if !named.insert(name.clone()) {
                                return Err(CompileError::DuplicateName {
                                    name: name.clone(),
                                    at: *at,
                                });
                            }
                        }
                        None => saw_positional = true,
                    }
                }
                if saw_positional && saw_named {
                    return Err(CompileError::BadMix { at: *at });
                }
            }
        }
    }
    Ok(())
}

fn check_sample_rate(rate: crate::ast::SampleRate, at: crate::error::Location) -> Result<(), CompileError> {
    match rate {
        crate::ast::SampleRate::Percent(_) => Ok(()),
        crate::ast::SampleRate::Ratio { denominator, .. } => {
            if denominator == 0 {
                Err(CompileError::BadSample {
                    reason: "zero denominator".to_owned(),
                    at,
                })
            } else {
                Ok(())
            }
        }
    }
}

fn check_identifiers(expr: &Expr, target: ProbeTarget) -> Result<(), CompileError> {
    match expr {
        Expr::IntLit(..) | Expr::FloatLit(..) | Expr::StringLit(..) | Expr::BoolLit(..) | Expr::NoneLit(..) => Ok(()),
        Expr::RequestVar(..) => Ok(()),
        Expr::Identifier(name, at) => {
            if is_known_frame_name(name, target) {
                Ok(())
            } else {
                Err(CompileError::UnknownVariable {
                    name: name.clone(),
                    at: *at,
                })
            }
        }
        Expr::Attr { base, .. } => check_identifiers(base, target),
        Expr::Index { base, key, .. } => {
            check_identifiers(base, target)?;
            check_identifiers(key, target)
        }
        Expr::Call { args, .. } => {
            for arg in args {
                check_identifiers(arg, target)?;
            }
            Ok(())
        }
        Expr::Unary { operand, .. } => check_identifiers(operand, target),
        Expr::Binary { lhs, rhs, .. } => {
            check_identifiers(lhs, target)?;
            check_identifiers(rhs, target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn accepts_known_frame_names() {
        let program = parse("fn:m.f:entry / arg0 == 1 / { capture(arg0, self, kwargs); }").unwrap();
        analyze(&program).unwrap();
    }

    #[test]
    fn rejects_unknown_identifier() {
        let program = parse("fn:m.f:entry { capture(mystery_var); }").unwrap();
        assert!(matches!(analyze(&program), Err(CompileError::UnknownVariable { .. })));
    }

    #[test]
    fn rejects_retval_outside_exit() {
        let program = parse("fn:m.f:entry { capture(retval); }").unwrap();
        assert!(matches!(analyze(&program), Err(CompileError::UnknownVariable { .. })));
    }

    #[test]
    fn accepts_retval_on_exit() {
        let program = parse("fn:m.f:exit { capture(retval, exception); }").unwrap();
        analyze(&program).unwrap();
    }

    #[test]
    fn rejects_mixed_capture_args() {
        let program = parse("fn:m.f:entry { capture(arg0, v = arg0); }").unwrap();
        assert!(matches!(analyze(&program), Err(CompileError::BadMix { .. })));
    }

    #[test]
    fn rejects_duplicate_named_args() {
        let program = parse("fn:m.f:entry { capture(v = arg0, v = self); }").unwrap();
        assert!(matches!(analyze(&program), Err(CompileError::DuplicateName { .. })));
    }

    #[test]
    fn rejects_zero_denominator_sample() {
        let program = parse("fn:m.f:entry { sample 1/0; capture(arg0); }").unwrap();
        assert!(matches!(analyze(&program), Err(CompileError::BadSample { .. })));
    }

    #[test]
    fn accepts_reserved_sample_ok_identifier() {
        let program = parse("fn:m.f:entry / __sample_ok__ / { capture(arg0); }").unwrap();
        analyze(&program).unwrap();
    }
}
