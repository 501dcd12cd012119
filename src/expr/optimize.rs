//! Expression optimizer
//!
//! Rewrites are applied bottom-up as the parser builds nodes, through the
//! smart constructors here, then a final top-level pass runs over the whole
//! tree. Gated by the -O level:
//!
//! - O1: constant propagation around not, double negation, De Morgan's
//!   laws, conjunction/disjunction elimination and short-circuiting
//! - O2: purity-based elimination of dead pure subexpressions
//! - O4: a fully pure expression can produce no output at all and is
//!   replaced by -false
//!
//! A subtree containing any impure leaf is only dropped when the rewrite
//! provably preserves its observable effects.

use super::{Expr, ExprKind};

/// Optimizer settings shared across constructors
#[derive(Debug, Clone, Copy)]
pub struct OptContext {
    /// Optimization level 0-4
    pub level: u8,
    /// Log every rewrite to stderr (-D opt)
    pub debug: bool,
}

impl OptContext {
    fn log(&self, level: u8, rule: &str, before: &str, after: &dyn std::fmt::Display) {
        if self.debug {
            eprintln!("-O{level}: {rule}: {before} <==> {after}");
        }
    }

    fn describe(&self, token: &str, parts: &[&Expr]) -> String {
        if !self.debug {
            return String::new();
        }
        let mut s = format!("({token}");
        for part in parts {
            s.push(' ');
            s.push_str(&part.to_string());
        }
        s.push(')');
        s
    }
}

fn is_not(expr: &Expr) -> bool {
    matches!(expr.kind(), ExprKind::Not(_))
}

fn unwrap_not(expr: Expr) -> Expr {
    match expr.kind {
        ExprKind::Not(inner) => *inner,
        _ => unreachable!("unwrap_not on a non-negation"),
    }
}

/// Build a negation, simplifying where the level allows.
pub fn not_expr(ctx: &OptContext, rhs: Expr, token: &str) -> Expr {
    if ctx.level >= 1 {
        if rhs.is_true() {
            let before = ctx.describe(token, &[&rhs]);
            let result = Expr::falsehood();
            ctx.log(1, "constant propagation", &before, &result);
            return result;
        }
        if rhs.is_false() {
            let before = ctx.describe(token, &[&rhs]);
            let result = Expr::truth();
            ctx.log(1, "constant propagation", &before, &result);
            return result;
        }
        if is_not(&rhs) {
            let before = ctx.describe(token, &[&rhs]);
            let result = unwrap_not(rhs);
            ctx.log(1, "double negation", &before, &result);
            return result;
        }

        // De Morgan's laws, when they move a negation closer to a leaf
        let has_negated_child = match rhs.kind() {
            ExprKind::And(lhs, inner_rhs) | ExprKind::Or(lhs, inner_rhs) => {
                is_not(lhs) || is_not(inner_rhs)
            }
            _ => false,
        };
        if has_negated_child {
            let before = ctx.describe(token, &[&rhs]);
            let to_or = matches!(rhs.kind(), ExprKind::And(..));
            let (lhs, inner_rhs) = match rhs.kind {
                ExprKind::And(l, r) | ExprKind::Or(l, r) => (*l, *r),
                _ => unreachable!(),
            };
            let not_lhs = not_expr(ctx, lhs, token);
            let not_rhs = not_expr(ctx, inner_rhs, token);
            let result = if to_or {
                or_expr(ctx, not_lhs, not_rhs, "-o")
            } else {
                and_expr(ctx, not_lhs, not_rhs, "-a")
            };
            ctx.log(1, "De Morgan's laws", &before, &result);
            return result;
        }
    }

    Expr::new_not(rhs, vec![token.to_string()])
}

/// Build a conjunction, simplifying where the level allows.
pub fn and_expr(ctx: &OptContext, lhs: Expr, rhs: Expr, token: &str) -> Expr {
    if ctx.level >= 1 {
        if lhs.is_true() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "conjunction elimination", &before, &rhs);
            return rhs;
        }
        if rhs.is_true() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "conjunction elimination", &before, &lhs);
            return lhs;
        }
        if lhs.always_false() {
            // The right side would never run anyway
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "short-circuit", &before, &lhs);
            return lhs;
        }
        if ctx.level >= 2 && rhs.always_false() && lhs.is_pure() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(2, "purity", &before, &rhs);
            return rhs;
        }
        if is_not(&lhs) && is_not(&rhs) {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            let not_token = lhs.tokens()[0].clone();
            let or = or_expr(ctx, unwrap_not(lhs), unwrap_not(rhs), "-o");
            let result = not_expr(ctx, or, &not_token);
            ctx.log(1, "De Morgan's laws", &before, &result);
            return result;
        }
    }

    Expr::new_and(lhs, rhs, vec![token.to_string()])
}

/// Build a disjunction, simplifying where the level allows.
pub fn or_expr(ctx: &OptContext, lhs: Expr, rhs: Expr, token: &str) -> Expr {
    if ctx.level >= 1 {
        if lhs.always_true() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "short-circuit", &before, &lhs);
            return lhs;
        }
        if lhs.is_false() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "disjunctive syllogism", &before, &rhs);
            return rhs;
        }
        if rhs.is_false() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(1, "disjunctive syllogism", &before, &lhs);
            return lhs;
        }
        if ctx.level >= 2 && rhs.always_true() && lhs.is_pure() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(2, "purity", &before, &rhs);
            return rhs;
        }
        if is_not(&lhs) && is_not(&rhs) {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            let not_token = lhs.tokens()[0].clone();
            let and = and_expr(ctx, unwrap_not(lhs), unwrap_not(rhs), "-a");
            let result = not_expr(ctx, and, &not_token);
            ctx.log(1, "De Morgan's laws", &before, &result);
            return result;
        }
    }

    Expr::new_or(lhs, rhs, vec![token.to_string()])
}

/// Build a comma sequence, simplifying where the level allows.
pub fn comma_expr(ctx: &OptContext, mut lhs: Expr, rhs: Expr, token: &str) -> Expr {
    if ctx.level >= 1 {
        if is_not(&lhs) {
            // The left result is discarded, so the negation is dead
            let before = ctx.describe(token, &[&lhs, &rhs]);
            lhs = unwrap_not(lhs);
            ctx.log(1, "ignored result", &before, &lhs);
        }

        if ctx.level >= 2 && lhs.is_pure() {
            let before = ctx.describe(token, &[&lhs, &rhs]);
            ctx.log(2, "purity", &before, &rhs);
            return rhs;
        }
    }

    Expr::new_comma(lhs, rhs, vec![token.to_string()])
}

/// Apply the top-level rewrites to a finished expression.
pub fn optimize_top(ctx: &OptContext, mut expr: Expr) -> Expr {
    if ctx.level >= 2 {
        // A pure right operand of a top-level and/or/comma cannot affect
        // anything observable
        loop {
            let strip = match expr.kind() {
                ExprKind::And(_, rhs) | ExprKind::Or(_, rhs) | ExprKind::Comma(_, rhs) => {
                    rhs.is_pure()
                }
                _ => false,
            };
            if !strip {
                break;
            }
            let lhs = match expr.kind {
                ExprKind::And(lhs, _) | ExprKind::Or(lhs, _) | ExprKind::Comma(lhs, _) => *lhs,
                _ => unreachable!(),
            };
            ctx.log(2, "top-level purity", "", &lhs);
            expr = lhs;
        }
    }

    if ctx.level >= 4 && expr.is_pure() && !expr.is_false() {
        let result = Expr::falsehood();
        ctx.log(4, "top-level purity", &expr.to_string(), &result);
        return result;
    }

    expr
}

/// Re-run the optimizer over an existing tree, bottom-up.
///
/// Parsing already applies every rewrite, so this is mainly useful to check
/// that the rules are idempotent.
pub fn optimize(ctx: &OptContext, expr: Expr) -> Expr {
    let tokens = expr.tokens().to_vec();
    let token = tokens.first().cloned().unwrap_or_default();
    match expr.kind {
        ExprKind::Not(rhs) => not_expr(ctx, optimize(ctx, *rhs), &token),
        ExprKind::And(lhs, rhs) => {
            and_expr(ctx, optimize(ctx, *lhs), optimize(ctx, *rhs), &token)
        }
        ExprKind::Or(lhs, rhs) => or_expr(ctx, optimize(ctx, *lhs), optimize(ctx, *rhs), &token),
        ExprKind::Comma(lhs, rhs) => {
            comma_expr(ctx, optimize(ctx, *lhs), optimize(ctx, *rhs), &token)
        }
        _ => expr,
    }
}
