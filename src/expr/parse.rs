//! Command-line expression parser
//!
//! Turns raw find-style arguments into a [`SearchConfig`] plus an optimized
//! expression tree. Root paths may appear before the expression; flags and
//! options mix freely with predicates. The optimizer's smart constructors
//! run while the tree is being built, so rewrites see every node bottom-up.
//!
//! Grammar:
//!
//! ```text
//! EXPR   : CLAUSE ("," CLAUSE)*
//! CLAUSE : TERM (("-o" | "-or") TERM)*
//! TERM   : FACTOR (("-a" | "-and")? FACTOR)*
//! FACTOR : "(" EXPR ")" | ("!" | "-not") FACTOR | LITERAL
//! ```

use super::optimize::{and_expr, comma_expr, not_expr, optimize_top, or_expr, OptContext};
use super::{Action, Cmp, Expr, ModeCmp, SizeUnit, Test, TimeUnit};
use crate::config::SearchConfig;
use crate::error::{ParseError, ParseResult};
use crate::eval::exec::ExecSpec;
use crate::fmt::{printf, TimeField};
use crate::sink::Sink;
use crate::userdb;
use crate::walk::{FileKind, TimeSpec};
use chrono::{Days, Local, TimeZone};
use globset::GlobBuilder;
use std::cell::RefCell;
use std::path::{Path, PathBuf};

/// Every name the parser knows, for typo suggestions
const KNOWN_NAMES: &[&str] = &[
    "amin", "and", "anewer", "atime", "cmin", "cnewer", "color", "ctime", "d", "daystart",
    "delete", "depth", "empty", "exec", "executable", "f", "false", "fls", "follow", "fprint",
    "fprint0", "fprintf", "gid", "group", "hidden", "ignore_readdir_race", "ilname", "iname",
    "inum", "ipath", "iregex", "iwholename", "links", "lname", "ls", "maxdepth", "mindepth",
    "mmin", "mnewer", "mount", "mtime", "name", "newer", "nocolor", "nogroup", "nohidden",
    "noignore_readdir_race", "noleaf", "not", "nouser", "nowarn", "o", "ok", "or", "path",
    "perm", "print", "print0", "printf", "prune", "quit", "readable", "regex", "regextype",
    "samefile", "size", "sparse", "true", "type", "uid", "used", "user", "warn",
    "wholename", "writable", "xdev", "xtype",
];

/// Parse a full command line (paths plus expression).
///
/// `output` overrides the sink used by stdout-directed actions; tests use an
/// in-memory buffer here.
pub fn parse_command(args: &[String], output: Option<Sink>) -> ParseResult<(SearchConfig, Expr)> {
    let mut parser = Parser {
        args,
        pos: 0,
        config: SearchConfig::default(),
        output: output.unwrap_or_else(Sink::stdout),
        implicit_print: true,
        expr_started: false,
    };

    let expr = parser.parse_whole_expr()?;
    let mut config = parser.config;

    if config.roots.is_empty() {
        config.roots.push(PathBuf::from("."));
    }

    if config.debug.tree {
        eprintln!("{expr}");
    }

    Ok((config, expr))
}

struct Parser<'a> {
    args: &'a [String],
    pos: usize,
    config: SearchConfig,
    output: Sink,
    implicit_print: bool,
    expr_started: bool,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(|s| s.as_str())
    }

    fn advance(&mut self) -> &'a str {
        let arg = &self.args[self.pos];
        self.pos += 1;
        arg
    }

    /// Take the argument after a predicate, or fail with context.
    fn value_for(&mut self, arg: &str, what: &'static str) -> ParseResult<&'a str> {
        match self.peek() {
            Some(_) => Ok(self.advance()),
            None => Err(ParseError::MissingArgument {
                arg: arg.to_string(),
                what,
            }),
        }
    }

    fn opt_ctx(&self) -> OptContext {
        OptContext {
            level: self.config.optlevel,
            debug: self.config.debug.opt,
        }
    }

    /// Consume any root paths at the current position.
    fn skip_paths(&mut self) {
        while let Some(arg) = self.peek() {
            if arg.starts_with('-') && arg != "-" {
                if arg == "--" {
                    // find uses -- to end the flags; paths and predicates
                    // mix freely here, so it is just skipped
                    self.advance();
                    continue;
                }
                return;
            }

            // Always operators, never paths
            if arg == "(" || arg == "!" {
                return;
            }

            // These can be paths only before the expression starts
            if self.expr_started && (arg == ")" || arg == ",") {
                return;
            }

            let root = self.advance();
            self.config.roots.push(PathBuf::from(root));
        }
    }

    /// EXPR : CLAUSE ("," CLAUSE)*
    fn parse_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_clause()?;

        loop {
            self.skip_paths();
            match self.peek() {
                Some(",") => {
                    self.advance();
                    self.expr_started = true;
                    let rhs = self.parse_clause()?;
                    expr = comma_expr(&self.opt_ctx(), expr, rhs, ",");
                }
                _ => return Ok(expr),
            }
        }
    }

    /// CLAUSE : TERM (("-o" | "-or") TERM)*
    fn parse_clause(&mut self) -> ParseResult<Expr> {
        let mut clause = self.parse_term()?;

        loop {
            self.skip_paths();
            match self.peek() {
                Some("-o") | Some("-or") => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    clause = or_expr(&self.opt_ctx(), clause, rhs, "-o");
                }
                _ => return Ok(clause),
            }
        }
    }

    /// TERM : FACTOR (("-a" | "-and")? FACTOR)*
    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut term = self.parse_factor()?;

        loop {
            self.skip_paths();
            let Some(arg) = self.peek() else {
                return Ok(term);
            };

            if matches!(arg, "-o" | "-or" | "," | ")") {
                return Ok(term);
            }

            if matches!(arg, "-a" | "-and") {
                self.advance();
            }

            let rhs = self.parse_factor()?;
            term = and_expr(&self.opt_ctx(), term, rhs, "-a");
        }
    }

    /// FACTOR : "(" EXPR ")" | ("!" | "-not") FACTOR | LITERAL
    fn parse_factor(&mut self) -> ParseResult<Expr> {
        self.skip_paths();
        let Some(arg) = self.peek() else {
            return Err(ParseError::IncompleteExpression);
        };

        match arg {
            "(" => {
                self.advance();
                self.expr_started = true;
                let expr = self.parse_expr()?;
                self.skip_paths();
                match self.peek() {
                    Some(")") => {
                        self.advance();
                        Ok(expr)
                    }
                    _ => Err(ParseError::UnmatchedParen),
                }
            }
            "!" | "-not" => {
                self.advance();
                self.expr_started = true;
                let factor = self.parse_factor()?;
                Ok(not_expr(&self.opt_ctx(), factor, "!"))
            }
            _ => self.parse_literal(),
        }
    }

    /// Parse the whole command line: paths, then the expression, then the
    /// implicit -print wrapper and the top-level optimizer pass.
    fn parse_whole_expr(&mut self) -> ParseResult<Expr> {
        self.skip_paths();

        let mut expr = if self.peek().is_some() {
            self.parse_expr()?
        } else {
            Expr::truth()
        };

        if let Some(arg) = self.peek() {
            return Err(ParseError::UnexpectedToken {
                token: arg.to_string(),
            });
        }

        if self.implicit_print {
            let print = Expr::action(
                Action::Print {
                    sink: self.output.clone(),
                },
                vec!["-print".to_string()],
            );
            expr = and_expr(&self.opt_ctx(), expr, print, "-a");
        }

        Ok(optimize_top(&self.opt_ctx(), expr))
    }

    /// LITERAL : OPTION | TEST | ACTION
    fn parse_literal(&mut self) -> ParseResult<Expr> {
        let arg = self.peek().expect("paths already skipped");
        if !arg.starts_with('-') {
            return Err(ParseError::UnexpectedToken {
                token: arg.to_string(),
            });
        }

        let arg = self.advance();
        self.expr_started = true;
        let name = &arg[1..];

        // -O takes its level as a suffix
        if let Some(level) = name.strip_prefix('O') {
            let parsed = if level == "fast" {
                4
            } else {
                level
                    .parse::<u8>()
                    .map_err(|_| ParseError::InvalidOptLevel {
                        token: arg.to_string(),
                    })?
            };
            self.config.optlevel = parsed.min(4);
            return Ok(Expr::truth());
        }

        match name {
            // Flags controlling the traversal
            "P" => {
                self.config.walk.follow_roots = false;
                self.config.walk.follow_all = false;
                self.config.walk.detect_cycles = false;
                Ok(Expr::truth())
            }
            "H" => {
                self.config.walk.follow_roots = true;
                self.config.walk.follow_all = false;
                self.config.walk.detect_cycles = false;
                Ok(Expr::truth())
            }
            "L" | "follow" => {
                self.config.walk.follow_all = true;
                self.config.walk.detect_cycles = true;
                Ok(Expr::truth())
            }
            "E" => Ok(Expr::truth()),
            "X" => {
                self.config.xargs_safe = true;
                Ok(Expr::truth())
            }
            "D" => {
                let flags = self.value_for(arg, "a debug flag list")?;
                for flag in flags.split(',') {
                    match flag {
                        "opt" => self.config.debug.opt = true,
                        "rates" => self.config.debug.rates = true,
                        "stat" => self.config.debug.stat = true,
                        "tree" => self.config.debug.tree = true,
                        "all" => {
                            self.config.debug.opt = true;
                            self.config.debug.rates = true;
                            self.config.debug.stat = true;
                            self.config.debug.tree = true;
                        }
                        other => {
                            return Err(ParseError::InvalidDebugFlag {
                                token: other.to_string(),
                            })
                        }
                    }
                }
                Ok(Expr::truth())
            }
            "f" => {
                let path = self.value_for(arg, "a path")?;
                self.config.roots.push(PathBuf::from(path));
                Ok(Expr::truth())
            }

            // Options
            "x" | "xdev" | "mount" => {
                self.config.walk.same_filesystem = true;
                Ok(Expr::truth())
            }
            "d" => {
                self.config.walk.post_order = true;
                Ok(Expr::truth())
            }
            "depth" => {
                // BSD-style -depth N is a test; bare -depth is the option
                if self.peek().is_some_and(looks_like_icmp) {
                    let (cmp, n) = self.icmp_arg(arg)?;
                    Ok(Expr::test(
                        Test::Depth { cmp, n },
                        tokens(arg, &n.to_string()),
                    ))
                } else {
                    self.config.walk.post_order = true;
                    Ok(Expr::truth())
                }
            }
            "daystart" => {
                self.config.now = next_midnight(self.config.now);
                Ok(Expr::truth())
            }
            "mindepth" => {
                let value = self.int_arg(arg)?;
                self.config.mindepth = value as usize;
                Ok(Expr::truth())
            }
            "maxdepth" => {
                let value = self.int_arg(arg)?;
                self.config.maxdepth = value as usize;
                Ok(Expr::truth())
            }
            "ignore_readdir_race" => {
                self.config.ignore_races = true;
                Ok(Expr::truth())
            }
            "noignore_readdir_race" => {
                self.config.ignore_races = false;
                Ok(Expr::truth())
            }
            "color" | "nocolor" | "noleaf" | "warn" | "nowarn" => Ok(Expr::truth()),
            "regextype" => {
                let value = self.value_for(arg, "a regex type")?;
                match value {
                    "default" | "posix-basic" | "posix-extended" | "emacs" => Ok(Expr::truth()),
                    other => Err(ParseError::UnexpectedToken {
                        token: other.to_string(),
                    }),
                }
            }

            // Tests
            "true" => Ok(Expr::truth()),
            "false" => Ok(Expr::falsehood()),
            "name" | "iname" => {
                let pattern = self.value_for(arg, "a pattern")?;
                let matcher = compile_glob(pattern, name == "iname")?;
                Ok(Expr::test(
                    Test::Name { pattern: matcher },
                    tokens(arg, pattern),
                ))
            }
            "path" | "ipath" | "wholename" | "iwholename" => {
                let pattern = self.value_for(arg, "a pattern")?;
                let matcher = compile_glob(pattern, name.starts_with('i'))?;
                Ok(Expr::test(
                    Test::Path { pattern: matcher },
                    tokens(arg, pattern),
                ))
            }
            "lname" | "ilname" => {
                let pattern = self.value_for(arg, "a pattern")?;
                let matcher = compile_glob(pattern, name == "ilname")?;
                Ok(Expr::test(
                    Test::LinkName { pattern: matcher },
                    tokens(arg, pattern),
                ))
            }
            "regex" | "iregex" => {
                let pattern = self.value_for(arg, "a regex")?;
                // The whole path must match, per find semantics
                let anchored = format!("^(?:{pattern})$");
                let regex = regex::bytes::RegexBuilder::new(&anchored)
                    .case_insensitive(name == "iregex")
                    .build()
                    .map_err(|source| ParseError::InvalidRegex {
                        pattern: pattern.to_string(),
                        source: Box::new(source),
                    })?;
                Ok(Expr::test(Test::Regex { regex }, tokens(arg, pattern)))
            }
            "type" | "xtype" => {
                let letters = self.value_for(arg, "a type")?;
                let mask = parse_type_mask(arg, letters)?;
                let test = if name == "xtype" {
                    Test::XType { mask }
                } else {
                    Test::Type { mask }
                };
                Ok(Expr::test(test, tokens(arg, letters)))
            }
            "perm" => {
                let mode = self.value_for(arg, "a mode")?;
                let (cmp, rest) = match mode.as_bytes().first() {
                    Some(b'-') => (ModeCmp::All, &mode[1..]),
                    Some(b'/') => (ModeCmp::Any, &mode[1..]),
                    _ => (ModeCmp::Exact, mode),
                };
                let (file_mode, dir_mode) = parse_mode(rest).ok_or(ParseError::InvalidMode {
                    token: mode.to_string(),
                })?;
                Ok(Expr::test(
                    Test::Perm {
                        cmp,
                        file_mode,
                        dir_mode,
                    },
                    tokens(arg, mode),
                ))
            }
            "size" => {
                let value = self.value_for(arg, "a size")?;
                let (cmp, n, rest) = parse_icmp_prefix(value).ok_or(ParseError::InvalidInteger {
                    token: value.to_string(),
                })?;
                let unit = match rest {
                    "" | "b" => SizeUnit::Blocks,
                    "c" => SizeUnit::Bytes,
                    "w" => SizeUnit::Words,
                    "k" => SizeUnit::Kib,
                    "M" => SizeUnit::Mib,
                    "G" => SizeUnit::Gib,
                    "T" => SizeUnit::Tib,
                    "P" => SizeUnit::Pib,
                    _ => {
                        return Err(ParseError::InvalidSizeUnit {
                            arg: arg.to_string(),
                            token: value.to_string(),
                        })
                    }
                };
                Ok(Expr::test(Test::Size { cmp, n, unit }, tokens(arg, value)))
            }
            "links" => {
                let (cmp, n) = self.icmp_arg(arg)?;
                Ok(Expr::test(Test::Links { cmp, n }, self.last_tokens(2)))
            }
            "inum" => {
                let (cmp, n) = self.icmp_arg(arg)?;
                Ok(Expr::test(Test::Inode { cmp, n }, self.last_tokens(2)))
            }
            "uid" | "user" => {
                let value = self.value_for(arg, "a user")?;
                let test = if looks_like_icmp(value) {
                    let (cmp, n, rest) =
                        parse_icmp_prefix(value).ok_or(ParseError::InvalidInteger {
                            token: value.to_string(),
                        })?;
                    if !rest.is_empty() {
                        return Err(ParseError::InvalidInteger {
                            token: value.to_string(),
                        });
                    }
                    Test::Uid { cmp, n }
                } else {
                    let uid = userdb::uid_for_name(value).ok_or(ParseError::UnknownUser {
                        name: value.to_string(),
                    })?;
                    Test::Uid {
                        cmp: Cmp::Exact,
                        n: i64::from(uid),
                    }
                };
                Ok(Expr::test(test, tokens(arg, value)))
            }
            "gid" | "group" => {
                let value = self.value_for(arg, "a group")?;
                let test = if looks_like_icmp(value) {
                    let (cmp, n, rest) =
                        parse_icmp_prefix(value).ok_or(ParseError::InvalidInteger {
                            token: value.to_string(),
                        })?;
                    if !rest.is_empty() {
                        return Err(ParseError::InvalidInteger {
                            token: value.to_string(),
                        });
                    }
                    Test::Gid { cmp, n }
                } else {
                    let gid = userdb::gid_for_name(value).ok_or(ParseError::UnknownGroup {
                        name: value.to_string(),
                    })?;
                    Test::Gid {
                        cmp: Cmp::Exact,
                        n: i64::from(gid),
                    }
                };
                Ok(Expr::test(test, tokens(arg, value)))
            }
            "nouser" => Ok(Expr::test(Test::NoUser, tokens1(arg))),
            "nogroup" => Ok(Expr::test(Test::NoGroup, tokens1(arg))),
            "readable" => Ok(Expr::test(Test::Access { mode: libc::R_OK }, tokens1(arg))),
            "writable" => Ok(Expr::test(Test::Access { mode: libc::W_OK }, tokens1(arg))),
            "executable" => Ok(Expr::test(Test::Access { mode: libc::X_OK }, tokens1(arg))),
            "empty" => Ok(Expr::test(Test::Empty, tokens1(arg))),
            "hidden" => Ok(Expr::test(Test::Hidden, tokens1(arg))),
            "sparse" => Ok(Expr::test(Test::Sparse, tokens1(arg))),
            "amin" => self.time_test(arg, TimeField::Accessed, TimeUnit::Minutes),
            "atime" => self.time_test(arg, TimeField::Accessed, TimeUnit::Days),
            "cmin" => self.time_test(arg, TimeField::Changed, TimeUnit::Minutes),
            "ctime" => self.time_test(arg, TimeField::Changed, TimeUnit::Days),
            "mmin" => self.time_test(arg, TimeField::Modified, TimeUnit::Minutes),
            "mtime" => self.time_test(arg, TimeField::Modified, TimeUnit::Days),
            "anewer" => self.newer_test(arg, TimeField::Accessed),
            "cnewer" => self.newer_test(arg, TimeField::Changed),
            "newer" | "mnewer" => self.newer_test(arg, TimeField::Modified),
            "used" => {
                let (cmp, n) = self.icmp_arg(arg)?;
                Ok(Expr::test(Test::Used { cmp, n }, self.last_tokens(2)))
            }
            "samefile" => {
                let path = self.value_for(arg, "a path")?;
                let st = self.stat_reference(path)?;
                Ok(Expr::test(
                    Test::SameFile {
                        dev: st.dev(),
                        ino: st.ino(),
                    },
                    tokens(arg, path),
                ))
            }

            // Actions
            "print" => {
                self.implicit_print = false;
                Ok(Expr::action(
                    Action::Print {
                        sink: self.output.clone(),
                    },
                    tokens1(arg),
                ))
            }
            "print0" => {
                self.implicit_print = false;
                Ok(Expr::action(
                    Action::Print0 {
                        sink: self.output.clone(),
                    },
                    tokens1(arg),
                ))
            }
            "fprint" => {
                self.implicit_print = false;
                let sink = self.file_sink(arg)?;
                Ok(Expr::action(Action::Print { sink }, self.last_tokens(2)))
            }
            "fprint0" => {
                self.implicit_print = false;
                let sink = self.file_sink(arg)?;
                Ok(Expr::action(Action::Print0 { sink }, self.last_tokens(2)))
            }
            "printf" => {
                self.implicit_print = false;
                let format = self.value_for(arg, "a format string")?;
                let program = printf::compile(format)?;
                Ok(Expr::action(
                    Action::Printf {
                        program,
                        sink: self.output.clone(),
                    },
                    tokens(arg, format),
                ))
            }
            "fprintf" => {
                self.implicit_print = false;
                let sink = self.file_sink(arg)?;
                let format = self.value_for(arg, "a format string")?;
                let program = printf::compile(format)?;
                Ok(Expr::action(
                    Action::Printf { program, sink },
                    self.last_tokens(3),
                ))
            }
            "ls" => {
                self.implicit_print = false;
                Ok(Expr::action(
                    Action::Ls {
                        sink: self.output.clone(),
                        now: self.config.now,
                    },
                    tokens1(arg),
                ))
            }
            "fls" => {
                self.implicit_print = false;
                let sink = self.file_sink(arg)?;
                Ok(Expr::action(
                    Action::Ls {
                        sink,
                        now: self.config.now,
                    },
                    self.last_tokens(2),
                ))
            }
            "delete" => {
                self.implicit_print = false;
                // Deleting children before parents requires post-order
                self.config.walk.post_order = true;
                Ok(Expr::action(Action::Delete, tokens1(arg)))
            }
            "exec" | "ok" => {
                self.implicit_print = false;
                self.parse_exec(arg, name == "ok")
            }
            "prune" => Ok(Expr::action(Action::Prune, tokens1(arg))),
            "quit" => Ok(Expr::action(Action::Quit, tokens1(arg))),
            "nohidden" => Ok(Expr::action(Action::NoHidden, tokens1(arg))),

            _ => Err(ParseError::UnknownArgument {
                arg: arg.to_string(),
                suggestion: format!("-{}", closest_match(name)),
            }),
        }
    }

    fn parse_exec(&mut self, arg: &str, confirm: bool) -> ParseResult<Expr> {
        let mut template = Vec::new();
        let mut terminator = None;

        while let Some(word) = self.peek() {
            if word == ";" || (word == "+" && template.last().is_some_and(|w| w == "{}")) {
                terminator = Some(self.advance());
                break;
            }
            template.push(self.advance().to_string());
        }

        let Some(terminator) = terminator else {
            // A dangling + most likely means the {} was forgotten
            if template.last().is_some_and(|w| w == "+") {
                return Err(ParseError::BatchWithoutPlaceholder {
                    arg: arg.to_string(),
                });
            }
            return Err(ParseError::UnterminatedExec {
                arg: arg.to_string(),
            });
        };
        if template.is_empty() {
            return Err(ParseError::MissingArgument {
                arg: arg.to_string(),
                what: "a command",
            });
        }

        let batch = terminator == "+";
        if batch && confirm {
            return Err(ParseError::UnexpectedToken {
                token: "+".to_string(),
            });
        }

        let mut display = vec![arg.to_string()];
        display.extend(template.iter().cloned());
        display.push(terminator.to_string());

        let argv = template.into_iter().map(Into::into).collect();
        Ok(Expr::action(
            Action::Exec {
                spec: RefCell::new(ExecSpec::new(argv, batch, confirm)),
            },
            display,
        ))
    }

    fn time_test(&mut self, arg: &str, field: TimeField, unit: TimeUnit) -> ParseResult<Expr> {
        let (cmp, n) = self.icmp_arg(arg)?;
        Ok(Expr::test(
            Test::Time {
                field,
                unit,
                cmp,
                n,
                reference: self.config.now,
            },
            self.last_tokens(2),
        ))
    }

    fn newer_test(&mut self, arg: &str, field: TimeField) -> ParseResult<Expr> {
        let path = self.value_for(arg, "a reference file")?;
        let st = self.stat_reference(path)?;
        Ok(Expr::test(
            Test::Newer {
                field,
                reference: st.mtime(),
            },
            tokens(arg, path),
        ))
    }

    fn stat_reference(&self, path: &str) -> ParseResult<crate::walk::FileStat> {
        let cpath =
            std::ffi::CString::new(path).map_err(|_| ParseError::Reference {
                path: PathBuf::from(path),
                source: std::io::Error::from_raw_os_error(libc::EINVAL),
            })?;
        crate::walk::entry::fstatat(libc::AT_FDCWD, &cpath, self.config.walk.follow_all).map_err(
            |source| ParseError::Reference {
                path: PathBuf::from(path),
                source,
            },
        )
    }

    fn file_sink(&mut self, arg: &str) -> ParseResult<Sink> {
        let path = self.value_for(arg, "an output file")?;
        self.config.open_files += 1;
        Sink::create(Path::new(path)).map_err(|source| ParseError::Sink {
            path: PathBuf::from(path),
            source,
        })
    }

    fn int_arg(&mut self, arg: &str) -> ParseResult<i64> {
        let value = self.value_for(arg, "an integer")?;
        value.parse().map_err(|_| ParseError::InvalidInteger {
            token: value.to_string(),
        })
    }

    fn icmp_arg(&mut self, arg: &str) -> ParseResult<(Cmp, i64)> {
        let value = self.value_for(arg, "an integer")?;
        match parse_icmp_prefix(value) {
            Some((cmp, n, "")) => Ok((cmp, n)),
            _ => Err(ParseError::InvalidInteger {
                token: value.to_string(),
            }),
        }
    }

    /// The last `count` consumed arguments, for diagnostic dumps.
    fn last_tokens(&self, count: usize) -> Vec<String> {
        self.args[self.pos - count..self.pos].to_vec()
    }
}

fn tokens(arg: &str, value: &str) -> Vec<String> {
    vec![arg.to_string(), value.to_string()]
}

fn tokens1(arg: &str) -> Vec<String> {
    vec![arg.to_string()]
}

/// Whether a string looks like an `[-+]N` integer comparison.
fn looks_like_icmp(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    digits.starts_with(|c: char| c.is_ascii_digit())
}

/// Split `[-+]N<rest>` into comparison, value, and the unparsed suffix.
fn parse_icmp_prefix(s: &str) -> Option<(Cmp, i64, &str)> {
    let (cmp, rest) = match s.as_bytes().first() {
        Some(b'-') => (Cmp::Less, &s[1..]),
        Some(b'+') => (Cmp::Greater, &s[1..]),
        _ => (Cmp::Exact, s),
    };

    let digits_end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }

    let n = rest[..digits_end].parse().ok()?;
    Some((cmp, n, &rest[digits_end..]))
}

/// Compile a find-style glob. `*` and `?` cross `/`, matching fnmatch
/// without FNM_PATHNAME.
fn compile_glob(pattern: &str, case_insensitive: bool) -> ParseResult<globset::GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .case_insensitive(case_insensitive)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| ParseError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })
}

/// Parse the `[bcdDpfls]` letters of -type/-xtype, comma separated.
fn parse_type_mask(arg: &str, letters: &str) -> ParseResult<u32> {
    let mut mask = 0u32;
    let invalid = |reason| ParseError::InvalidType {
        arg: arg.to_string(),
        token: letters.to_string(),
        reason,
    };

    if letters.is_empty() {
        return Err(invalid("expected a type flag"));
    }

    for part in letters.split(',') {
        let mut chars = part.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return Err(invalid("types must be comma-separated"));
        };
        let kind = match letter {
            'b' => FileKind::Block,
            'c' => FileKind::Char,
            'd' => FileKind::Dir,
            'D' => FileKind::Door,
            'p' => FileKind::Fifo,
            'f' => FileKind::Regular,
            'l' => FileKind::Link,
            's' => FileKind::Socket,
            _ => return Err(invalid("unknown type flag (expected one of [bcdpflsD])")),
        };
        mask |= kind.bit();
    }

    Ok(mask)
}

/// Parse an octal or chmod-style symbolic mode into (file bits, dir bits).
/// The pair differs only through the `X` permission.
fn parse_mode(mode: &str) -> Option<(u32, u32)> {
    if mode.starts_with(|c: char| c.is_ascii_digit()) {
        let parsed = u32::from_str_radix(mode, 8).ok()?;
        if parsed > 0o7777 {
            return None;
        }
        return Some((parsed, parsed));
    }

    // The chmod(1) grammar:
    //
    // MODE : CLAUSE ["," CLAUSE]*
    // CLAUSE : WHO* ACTION+
    // WHO : "u" | "g" | "o" | "a"
    // ACTION : OP PERM* | OP PERMCOPY
    // OP : "+" | "-" | "="
    // PERM : "r" | "w" | "x" | "X" | "s" | "t"
    // PERMCOPY : "u" | "g" | "o"
    let mut file_mode = 0u32;
    let mut dir_mode = 0u32;

    for clause in mode.split(',') {
        let bytes = clause.as_bytes();
        let mut i = 0;

        let mut who = 0u32;
        while i < bytes.len() {
            match bytes[i] {
                b'u' => who |= 0o700,
                b'g' => who |= 0o070,
                b'o' => who |= 0o007,
                b'a' => who |= 0o777,
                _ => break,
            }
            i += 1;
        }
        if who == 0 {
            who = 0o777;
        }

        let mut actions = 0;
        while i < bytes.len() {
            let op = bytes[i];
            if !matches!(op, b'+' | b'-' | b'=') {
                return None;
            }
            i += 1;
            actions += 1;

            let mut file_change = 0u32;
            let mut dir_change = 0u32;

            // PERMCOPY like u=g has no effect on -perm
            if i < bytes.len() && matches!(bytes[i], b'u' | b'g' | b'o') {
                i += 1;
            } else {
                while i < bytes.len() {
                    match bytes[i] {
                        b'r' => {
                            file_change |= who & 0o444;
                            dir_change |= who & 0o444;
                        }
                        b'w' => {
                            file_change |= who & 0o222;
                            dir_change |= who & 0o222;
                        }
                        b'x' => {
                            file_change |= who & 0o111;
                            dir_change |= who & 0o111;
                        }
                        b'X' => {
                            dir_change |= who & 0o111;
                        }
                        b's' => {
                            if who & 0o700 != 0 {
                                file_change |= 0o4000;
                                dir_change |= 0o4000;
                            }
                            if who & 0o070 != 0 {
                                file_change |= 0o2000;
                                dir_change |= 0o2000;
                            }
                        }
                        b't' => {
                            file_change |= 0o1000;
                            dir_change |= 0o1000;
                        }
                        _ => break,
                    }
                    i += 1;
                }
            }

            match op {
                b'=' => {
                    file_mode = (file_mode & !who) | file_change;
                    dir_mode = (dir_mode & !who) | dir_change;
                }
                b'+' => {
                    file_mode |= file_change;
                    dir_mode |= dir_change;
                }
                b'-' => {
                    file_mode &= !file_change;
                    dir_mode &= !dir_change;
                }
                _ => unreachable!(),
            }
        }

        if actions == 0 {
            return None;
        }
    }

    Some((file_mode, dir_mode))
}

/// The start of tomorrow in local time, for -daystart.
fn next_midnight(now: TimeSpec) -> TimeSpec {
    let Some(today) = Local.timestamp_opt(now.sec, 0).single() else {
        return now;
    };
    let Some(tomorrow) = today
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| Local.from_local_datetime(&dt).single())
    else {
        return now;
    };
    TimeSpec {
        sec: tomorrow.timestamp(),
        nsec: 0,
    }
}

/// Closest known predicate by edit distance, for typo hints.
fn closest_match(name: &str) -> &'static str {
    KNOWN_NAMES
        .iter()
        .min_by_key(|candidate| edit_distance(name, candidate))
        .copied()
        .unwrap_or("name")
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    prev[b.len()]
}
