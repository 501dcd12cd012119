//! Expression trees of tests, actions, and operators
//!
//! A parsed command line becomes a tree of short-circuit operators over
//! tests (pure, side-effect free) and actions (impure). Each node carries
//! purity and constant-result flags that drive the optimizer, and counters
//! that back the rate-profiling debug output.

pub mod optimize;
pub mod parse;

use crate::eval::exec::ExecSpec;
use crate::fmt::{FormatProgram, TimeField};
use crate::sink::Sink;
use crate::walk::TimeSpec;
use globset::GlobMatcher;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::Duration;

/// Integer comparison mode for `N`, `+N`, `-N` arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    /// Exactly N
    Exact,
    /// Less than N
    Less,
    /// Greater than N
    Greater,
}

impl Cmp {
    /// Apply the comparison.
    pub fn matches(self, value: i64, target: i64) -> bool {
        match self {
            Cmp::Exact => value == target,
            Cmp::Less => value < target,
            Cmp::Greater => value > target,
        }
    }
}

/// Units accepted by -size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    /// 512-byte blocks (the default)
    Blocks,
    /// Bytes
    Bytes,
    /// Two-byte words
    Words,
    /// Kibibytes
    Kib,
    /// Mebibytes
    Mib,
    /// Gibibytes
    Gib,
    /// Tebibytes
    Tib,
    /// Pebibytes
    Pib,
}

impl SizeUnit {
    /// Bytes per unit.
    pub fn scale(self) -> i64 {
        match self {
            SizeUnit::Blocks => 512,
            SizeUnit::Bytes => 1,
            SizeUnit::Words => 2,
            SizeUnit::Kib => 1 << 10,
            SizeUnit::Mib => 1 << 20,
            SizeUnit::Gib => 1 << 30,
            SizeUnit::Tib => 1 << 40,
            SizeUnit::Pib => 1 << 50,
        }
    }
}

/// Units accepted by the time tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// -amin/-cmin/-mmin
    Minutes,
    /// -atime/-ctime/-mtime
    Days,
}

impl TimeUnit {
    /// Seconds per unit.
    pub fn seconds(self) -> i64 {
        match self {
            TimeUnit::Minutes => 60,
            TimeUnit::Days => 60 * 60 * 24,
        }
    }
}

/// Mode comparison semantics for -perm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCmp {
    /// -perm MODE: all twelve bits equal
    Exact,
    /// -perm -MODE: all given bits set
    All,
    /// -perm /MODE: any given bit set
    Any,
}

/// A pure test
#[derive(Debug)]
pub enum Test {
    /// -name/-iname glob against the basename
    Name { pattern: GlobMatcher },
    /// -path/-ipath glob against the full path
    Path { pattern: GlobMatcher },
    /// -lname/-ilname glob against a symlink's target
    LinkName { pattern: GlobMatcher },
    /// -regex/-iregex whole-path match
    Regex { regex: regex::bytes::Regex },
    /// -type with a mask of accepted kinds
    Type { mask: u32 },
    /// -xtype: like -type but with symlink following inverted
    XType { mask: u32 },
    /// -perm
    Perm {
        cmp: ModeCmp,
        file_mode: u32,
        dir_mode: u32,
    },
    /// -size, rounded up to the unit
    Size { cmp: Cmp, n: i64, unit: SizeUnit },
    /// -links
    Links { cmp: Cmp, n: i64 },
    /// -inum
    Inode { cmp: Cmp, n: i64 },
    /// -depth N
    Depth { cmp: Cmp, n: i64 },
    /// -uid/-user
    Uid { cmp: Cmp, n: i64 },
    /// -gid/-group
    Gid { cmp: Cmp, n: i64 },
    /// -nouser
    NoUser,
    /// -nogroup
    NoGroup,
    /// -readable/-writable/-executable via faccessat
    Access { mode: i32 },
    /// -empty
    Empty,
    /// -hidden: basename starts with a dot
    Hidden,
    /// -sparse: fewer blocks than the size implies
    Sparse,
    /// -amin/-atime/-cmin/-ctime/-mmin/-mtime
    Time {
        field: TimeField,
        unit: TimeUnit,
        cmp: Cmp,
        n: i64,
        reference: TimeSpec,
    },
    /// -newer/-anewer/-cnewer/-mnewer against a reference file's mtime
    Newer {
        field: TimeField,
        reference: TimeSpec,
    },
    /// -used: days between access and status change
    Used { cmp: Cmp, n: i64 },
    /// -samefile
    SameFile { dev: u64, ino: u64 },
}

/// An impure action
#[derive(Debug)]
pub enum Action {
    /// -print/-fprint
    Print { sink: Sink },
    /// -print0/-fprint0
    Print0 { sink: Sink },
    /// -printf/-fprintf
    Printf {
        program: FormatProgram,
        sink: Sink,
    },
    /// -ls/-fls
    Ls { sink: Sink, now: TimeSpec },
    /// -delete
    Delete,
    /// -exec/-ok, one-shot or batched
    Exec { spec: RefCell<ExecSpec> },
    /// -prune
    Prune,
    /// -quit
    Quit,
    /// -nohidden
    NoHidden,
}

/// Node payload
#[derive(Debug)]
pub enum ExprKind {
    /// -true
    True,
    /// -false
    False,
    /// Negation
    Not(Box<Expr>),
    /// Short-circuit conjunction
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction
    Or(Box<Expr>, Box<Expr>),
    /// Sequence; the value is the right side's
    Comma(Box<Expr>, Box<Expr>),
    /// A test
    Test(Test),
    /// An action
    Act(Action),
}

/// Per-node evaluation counters for -D rates
#[derive(Debug, Default)]
pub struct EvalStats {
    evaluations: Cell<u64>,
    successes: Cell<u64>,
    elapsed: Cell<Duration>,
}

impl EvalStats {
    /// Record one evaluation.
    pub fn record(&self, success: bool, elapsed: Option<Duration>) {
        self.evaluations.set(self.evaluations.get() + 1);
        if success {
            self.successes.set(self.successes.get() + 1);
        }
        if let Some(elapsed) = elapsed {
            self.elapsed.set(self.elapsed.get() + elapsed);
        }
    }

    /// Total evaluations.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.get()
    }

    /// Evaluations that returned true.
    pub fn successes(&self) -> u64 {
        self.successes.get()
    }

    /// Accumulated wall-clock time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

/// A node in the expression tree
#[derive(Debug)]
pub struct Expr {
    kind: ExprKind,
    pure: bool,
    always_true: bool,
    always_false: bool,
    tokens: Vec<String>,
    stats: EvalStats,
}

impl Expr {
    /// The literal -true leaf.
    pub fn truth() -> Expr {
        Expr {
            kind: ExprKind::True,
            pure: true,
            always_true: true,
            always_false: false,
            tokens: vec!["-true".to_string()],
            stats: EvalStats::default(),
        }
    }

    /// The literal -false leaf.
    pub fn falsehood() -> Expr {
        Expr {
            kind: ExprKind::False,
            pure: true,
            always_true: false,
            always_false: true,
            tokens: vec!["-false".to_string()],
            stats: EvalStats::default(),
        }
    }

    /// A test leaf. Tests are pure.
    pub fn test(test: Test, tokens: Vec<String>) -> Expr {
        Expr {
            kind: ExprKind::Test(test),
            pure: true,
            always_true: false,
            always_false: false,
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// An action leaf. Actions are impure.
    pub fn action(action: Action, tokens: Vec<String>) -> Expr {
        Expr {
            kind: ExprKind::Act(action),
            pure: false,
            always_true: false,
            always_false: false,
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// Build a negation node without optimization.
    pub fn new_not(rhs: Expr, tokens: Vec<String>) -> Expr {
        Expr {
            pure: rhs.pure,
            always_true: rhs.always_false,
            always_false: rhs.always_true,
            kind: ExprKind::Not(Box::new(rhs)),
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// Build a conjunction node without optimization.
    pub fn new_and(lhs: Expr, rhs: Expr, tokens: Vec<String>) -> Expr {
        Expr {
            pure: lhs.pure && rhs.pure,
            always_true: lhs.always_true && rhs.always_true,
            always_false: lhs.always_false || rhs.always_false,
            kind: ExprKind::And(Box::new(lhs), Box::new(rhs)),
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// Build a disjunction node without optimization.
    pub fn new_or(lhs: Expr, rhs: Expr, tokens: Vec<String>) -> Expr {
        Expr {
            pure: lhs.pure && rhs.pure,
            always_true: lhs.always_true || rhs.always_true,
            always_false: lhs.always_false && rhs.always_false,
            kind: ExprKind::Or(Box::new(lhs), Box::new(rhs)),
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// Build a sequence node without optimization.
    pub fn new_comma(lhs: Expr, rhs: Expr, tokens: Vec<String>) -> Expr {
        Expr {
            pure: lhs.pure && rhs.pure,
            always_true: rhs.always_true,
            always_false: rhs.always_false,
            kind: ExprKind::Comma(Box::new(lhs), Box::new(rhs)),
            tokens,
            stats: EvalStats::default(),
        }
    }

    /// The node payload.
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// Whether evaluating this subtree has no observable effect.
    pub fn is_pure(&self) -> bool {
        self.pure
    }

    /// Whether the subtree provably evaluates to true.
    pub fn always_true(&self) -> bool {
        self.always_true
    }

    /// Whether the subtree provably evaluates to false.
    pub fn always_false(&self) -> bool {
        self.always_false
    }

    /// Whether this is the literal -true leaf.
    pub fn is_true(&self) -> bool {
        matches!(self.kind, ExprKind::True)
    }

    /// Whether this is the literal -false leaf.
    pub fn is_false(&self) -> bool {
        matches!(self.kind, ExprKind::False)
    }

    /// The original command-line tokens, for diagnostics.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Evaluation counters.
    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    /// Flush any pending -exec ... + batches, recording failures in `ret`.
    pub fn finish_execs(&self, ret: &mut i32) {
        if let ExprKind::Act(Action::Exec { spec }) = &self.kind {
            if spec.borrow_mut().finish().is_err() {
                *ret = 1;
            }
        }
        match &self.kind {
            ExprKind::Not(rhs) => rhs.finish_execs(ret),
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) | ExprKind::Comma(lhs, rhs) => {
                lhs.finish_execs(ret);
                rhs.finish_execs(ret);
            }
            _ => {}
        }
    }

    /// Dump the tree with evaluation statistics, for -D rates.
    pub fn dump_rates(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        write!(out, "(")?;
        write!(out, "{}", self.tokens.join(" "))?;

        let evals = self.stats.evaluations();
        if evals > 0 {
            let rate = 100.0 * self.stats.successes() as f64 / evals as f64;
            let per_eval = self.stats.elapsed().as_nanos() as f64 / evals as f64;
            write!(
                out,
                " [{}/{}={:.3}%; {:.0}ns]",
                self.stats.successes(),
                evals,
                rate,
                per_eval
            )?;
        }

        match &self.kind {
            ExprKind::Not(rhs) => {
                write!(out, " ")?;
                rhs.dump_rates(out)?;
            }
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) | ExprKind::Comma(lhs, rhs) => {
                write!(out, " ")?;
                lhs.dump_rates(out)?;
                write!(out, " ")?;
                rhs.dump_rates(out)?;
            }
            _ => {}
        }

        write!(out, ")")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.tokens.join(" "))?;
        match &self.kind {
            ExprKind::Not(rhs) => write!(f, " {rhs}")?,
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) | ExprKind::Comma(lhs, rhs) => {
                write!(f, " {lhs} {rhs}")?;
            }
            _ => {}
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_flags() {
        let t = Expr::truth();
        assert!(t.is_pure() && t.always_true() && !t.always_false());

        let f = Expr::falsehood();
        assert!(f.is_pure() && f.always_false() && !f.always_true());

        let hidden = Expr::test(Test::Hidden, vec!["-hidden".into()]);
        assert!(hidden.is_pure());
        assert!(!hidden.always_true() && !hidden.always_false());

        let print = Expr::action(
            Action::Print {
                sink: Sink::buffer(),
            },
            vec!["-print".into()],
        );
        assert!(!print.is_pure());
    }

    #[test]
    fn test_flag_propagation() {
        let and = Expr::new_and(Expr::truth(), Expr::truth(), vec!["-a".into()]);
        assert!(and.always_true() && !and.always_false());

        let and = Expr::new_and(Expr::truth(), Expr::falsehood(), vec!["-a".into()]);
        assert!(and.always_false());

        let or = Expr::new_or(Expr::falsehood(), Expr::truth(), vec!["-o".into()]);
        assert!(or.always_true());

        let not = Expr::new_not(Expr::truth(), vec!["-not".into()]);
        assert!(not.always_false());

        let comma = Expr::new_comma(
            Expr::action(
                Action::Print {
                    sink: Sink::buffer(),
                },
                vec!["-print".into()],
            ),
            Expr::falsehood(),
            vec![",".into()],
        );
        assert!(comma.always_false());
        assert!(!comma.is_pure());
    }

    #[test]
    fn test_display() {
        let expr = Expr::new_and(
            Expr::test(Test::Hidden, vec!["-hidden".into()]),
            Expr::truth(),
            vec!["-a".into()],
        );
        assert_eq!(expr.to_string(), "(-a (-hidden) (-true))");
    }

    #[test]
    fn test_stats_record() {
        let expr = Expr::truth();
        expr.stats().record(true, Some(Duration::from_nanos(100)));
        expr.stats().record(false, Some(Duration::from_nanos(50)));
        assert_eq!(expr.stats().evaluations(), 2);
        assert_eq!(expr.stats().successes(), 1);
        assert_eq!(expr.stats().elapsed(), Duration::from_nanos(150));
    }
}
