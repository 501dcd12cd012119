//! Integration tests for bfind
//!
//! These drive the full pipeline - parse, walk, evaluate - over real
//! temporary directory trees, capturing action output in memory.

use bfind::eval::Evaluator;
use bfind::expr::parse::parse_command;
use bfind::sink::Sink;
use bfind::walk::{walk, FileKind, Flow, Visit, VisitPhase, WalkOptions};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

/// Parse and run a command line, returning the exit code and stdout bytes.
fn run_bfind(args: &[String]) -> (i32, Vec<u8>) {
    let sink = Sink::buffer();
    let (config, expr) = parse_command(args, Some(sink.clone())).expect("parse failed");
    let interrupted = Arc::new(AtomicBool::new(false));
    let mut evaluator = Evaluator::new(&config, &expr, interrupted);

    for root in &config.roots {
        if evaluator.should_quit() {
            break;
        }
        if walk(root, &config.walk, &mut |visit: &mut Visit| {
            evaluator.visit(visit)
        })
        .is_err()
        {
            evaluator.record_failure();
        }
    }

    (evaluator.finish(), sink.take_buffer())
}

fn bfind(root: &Path, expr: &[&str]) -> (i32, Vec<String>) {
    let mut args = vec![root.to_string_lossy().into_owned()];
    args.extend(expr.iter().map(|s| s.to_string()));
    let (ret, out) = run_bfind(&args);
    let lines = String::from_utf8_lossy(&out)
        .lines()
        .map(|l| l.to_string())
        .collect();
    (ret, lines)
}

#[test]
fn print_visits_breadth_first() {
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    fs::create_dir_all(a.join("b")).unwrap();
    fs::write(a.join("b/c"), b"").unwrap();

    let (ret, lines) = bfind(&a, &["-print"]);
    assert_eq!(ret, 0);
    assert_eq!(
        lines,
        vec![
            a.display().to_string(),
            a.join("b").display().to_string(),
            a.join("b/c").display().to_string(),
        ]
    );
}

#[test]
fn type_f_prints_only_the_file() {
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    fs::create_dir_all(a.join("b")).unwrap();
    fs::write(a.join("b/c"), b"").unwrap();

    let (_, lines) = bfind(&a, &["-type", "f", "-print"]);
    assert_eq!(lines, vec![a.join("b/c").display().to_string()]);
}

#[test]
fn same_depth_before_deeper() {
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    fs::create_dir_all(a.join("sub")).unwrap();
    fs::write(a.join("x"), b"").unwrap();
    fs::write(a.join("y"), b"").unwrap();
    fs::write(a.join("sub/z"), b"").unwrap();

    let (_, lines) = bfind(&a, &["-print"]);
    assert_eq!(lines[0], a.display().to_string());

    // x, y, and sub come in readdir order, but all before sub/z
    let z_index = lines
        .iter()
        .position(|l| l.ends_with("sub/z"))
        .expect("z printed");
    assert_eq!(z_index, lines.len() - 1);
    assert_eq!(lines.len(), 5);
}

#[cfg(unix)]
#[test]
fn broken_symlink_matches_type_l() {
    use std::os::unix::fs::symlink;

    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    symlink("missing-target", root.join("link")).unwrap();

    // Follow mode must not matter for a dangling link
    for follow in [&[][..], &["-L"][..]] {
        let mut expr: Vec<&str> = follow.to_vec();
        expr.extend(["-type", "l", "-print"]);
        let (_, lines) = bfind(&root, &expr);
        assert_eq!(
            lines,
            vec![root.join("link").display().to_string()],
            "follow flags {follow:?}"
        );
    }
}

#[test]
fn printf_size_matches_file_length() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("f"), b"7 bytes").unwrap();

    let (_, lines) = bfind(&root, &["-type", "f", "-printf", "%p %s\\n"]);
    assert_eq!(lines, vec![format!("{} 7", root.join("f").display())]);
}

#[test]
fn printf_p_equals_print() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir(root.join("d")).unwrap();
    fs::write(root.join("d/f"), b"").unwrap();

    let (_, with_print) = bfind(&root, &["-print"]);
    let (_, with_printf) = bfind(&root, &["-printf", "%p\\n"]);
    assert_eq!(with_print, with_printf);
}

#[test]
fn grouped_or_does_not_duplicate_output() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    for name in ["a", "b", "c"] {
        fs::write(root.join(name), b"").unwrap();
    }

    let (_, lines) = bfind(
        &root,
        &["(", "-name", "a", "-or", "-name", "b", ")", "-and", "-print"],
    );
    let mut sorted = lines.clone();
    sorted.sort();
    assert_eq!(
        sorted,
        vec![
            root.join("a").display().to_string(),
            root.join("b").display().to_string(),
        ]
    );
    assert_eq!(lines.len(), 2, "no duplicates from the implicit print");
}

#[test]
fn single_file_root_is_one_visit() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("solo");
    fs::write(&file, b"").unwrap();

    let mut visits = Vec::new();
    let opts = WalkOptions {
        post_order: true,
        ..WalkOptions::default()
    };
    walk(&file, &opts, &mut |visit: &mut Visit| {
        visits.push((visit.depth(), visit.phase(), visit.kind()));
        Ok(Flow::Continue)
    })
    .unwrap();

    // Exactly one callback, depth 0, no post-order for a non-directory
    assert_eq!(visits, vec![(0, VisitPhase::Pre, FileKind::Regular)]);
}

#[test]
fn empty_directory_gets_pre_and_post_visits() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("hollow");
    fs::create_dir(&root).unwrap();

    let mut phases = Vec::new();
    let opts = WalkOptions {
        post_order: true,
        ..WalkOptions::default()
    };
    walk(&root, &opts, &mut |visit: &mut Visit| {
        phases.push(visit.phase());
        Ok(Flow::Continue)
    })
    .unwrap();

    assert_eq!(phases, vec![VisitPhase::Pre, VisitPhase::Post]);
}

#[cfg(unix)]
#[test]
fn symlink_loop_reports_once() {
    use std::os::unix::fs::symlink;

    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    symlink(&root, root.join("back")).unwrap();

    let opts = WalkOptions {
        follow_all: true,
        detect_cycles: true,
        ..WalkOptions::default()
    };

    let mut loop_errors = 0;
    let mut visits = 0;
    walk(&root, &opts, &mut |visit: &mut Visit| {
        visits += 1;
        if visit.error() == Some(libc::ELOOP) {
            loop_errors += 1;
            return Ok(Flow::SkipSubtree);
        }
        Ok(Flow::Continue)
    })
    .unwrap();

    assert_eq!(loop_errors, 1);
    // root + the looping link, nothing expanded twice
    assert_eq!(visits, 2);
}

#[test]
fn depth_is_never_decreasing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    // A few levels with mixed fan-out
    fs::create_dir_all(root.join("a/p/q")).unwrap();
    fs::create_dir_all(root.join("b/r")).unwrap();
    fs::write(root.join("a/f1"), b"").unwrap();
    fs::write(root.join("b/f2"), b"").unwrap();
    fs::write(root.join("a/p/q/deep"), b"").unwrap();

    let mut depths = Vec::new();
    walk(&root, &WalkOptions::default(), &mut |visit: &mut Visit| {
        depths.push(visit.depth());
        Ok(Flow::Continue)
    })
    .unwrap();

    assert!(
        depths.windows(2).all(|w| w[0] <= w[1]),
        "BFS depths regressed: {depths:?}"
    );
}

#[test]
fn post_order_strictly_after_descendants() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("top");
    fs::create_dir_all(root.join("m1/inner")).unwrap();
    fs::create_dir_all(root.join("m2")).unwrap();
    fs::write(root.join("m1/inner/f"), b"").unwrap();
    fs::write(root.join("m2/g"), b"").unwrap();

    let opts = WalkOptions {
        post_order: true,
        ..WalkOptions::default()
    };

    let mut events: Vec<(PathBuf, VisitPhase)> = Vec::new();
    walk(&root, &opts, &mut |visit: &mut Visit| {
        events.push((visit.path().to_path_buf(), visit.phase()));
        Ok(Flow::Continue)
    })
    .unwrap();

    for (i, (dir, phase)) in events.iter().enumerate() {
        if *phase != VisitPhase::Post {
            continue;
        }
        // Every event under this directory must have happened earlier
        for (j, (path, _)) in events.iter().enumerate() {
            if path != dir && path.starts_with(dir) {
                assert!(j < i, "{} visited after its ancestor's post-order", path.display());
            }
        }
    }
}

#[test]
fn maxdepth_prunes_descent() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("l1/l2")).unwrap();
    fs::write(root.join("l1/l2/l3"), b"").unwrap();

    let (_, lines) = bfind(&root, &["-maxdepth", "1"]);
    assert!(lines.iter().any(|l| l.ends_with("l1")));
    assert!(!lines.iter().any(|l| l.ends_with("l2")));
}

#[test]
fn delete_removes_tree_bottom_up() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("doomed");
    fs::create_dir_all(root.join("nested/deeper")).unwrap();
    fs::write(root.join("nested/deeper/file"), b"x").unwrap();

    let (ret, _) = bfind(&root, &["-delete"]);
    assert_eq!(ret, 0);
    assert!(!root.exists());
}

#[test]
fn quit_after_first_match() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    for i in 0..50 {
        fs::write(root.join(format!("file{i:02}")), b"").unwrap();
    }

    let (ret, lines) = bfind(&root, &["-type", "f", "-print", "-quit"]);
    assert_eq!(ret, 0);
    assert_eq!(lines.len(), 1);
}

#[test]
fn multiple_roots_walked_in_order() {
    let tmp = tempdir().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    fs::create_dir(&first).unwrap();
    fs::create_dir(&second).unwrap();
    fs::write(first.join("f"), b"").unwrap();
    fs::write(second.join("g"), b"").unwrap();

    let args = vec![
        first.to_string_lossy().into_owned(),
        second.to_string_lossy().into_owned(),
        "-type".to_string(),
        "f".to_string(),
    ];
    let (ret, out) = run_bfind(&args);
    assert_eq!(ret, 0);
    let lines: Vec<String> = String::from_utf8_lossy(&out)
        .lines()
        .map(|l| l.to_string())
        .collect();
    assert_eq!(
        lines,
        vec![
            first.join("f").display().to_string(),
            second.join("g").display().to_string(),
        ]
    );
}

#[test]
fn fprint_writes_to_file() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("data");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("f"), b"").unwrap();
    let out_file = tmp.path().join("results.txt");

    let (ret, lines) = bfind(
        &root,
        &["-type", "f", "-fprint", out_file.to_str().unwrap()],
    );
    assert_eq!(ret, 0);
    assert!(lines.is_empty(), "nothing goes to stdout");

    let contents = fs::read_to_string(&out_file).unwrap();
    assert_eq!(contents, format!("{}\n", root.join("f").display()));
}

#[test]
fn exec_filters_by_exit_status() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("match-me"), b"").unwrap();
    fs::write(root.join("other"), b"").unwrap();

    // grep-like filtering through /bin/sh: succeed only for one name
    let (_, lines) = bfind(
        &root,
        &[
            "-type", "f", "-exec", "sh", "-c", "test $(basename {}) = match-me", ";", "-print",
        ],
    );
    assert_eq!(lines, vec![root.join("match-me").display().to_string()]);
}

#[test]
fn mindepth_excludes_the_root() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("f"), b"").unwrap();

    let (_, lines) = bfind(&root, &["-mindepth", "1"]);
    assert_eq!(lines, vec![root.join("f").display().to_string()]);
}

#[test]
fn name_matches_root_with_trailing_slash() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("target");
    fs::create_dir(&root).unwrap();

    let mut arg = root.to_string_lossy().into_owned();
    arg.push('/');
    let (ret, out) = run_bfind(&[arg, "-name".into(), "target".into()]);
    assert_eq!(ret, 0);
    assert!(!out.is_empty(), "trailing slash must not break -name");
}

#[test]
fn error_on_missing_root_sets_exit_code() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("no-such-dir");

    let (ret, lines) = bfind(&missing, &["-print"]);
    assert_eq!(ret, 1);
    assert!(lines.is_empty());
}

#[test]
fn ls_output_has_expected_columns() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("f"), b"hello").unwrap();

    let (_, lines) = bfind(&root, &["-type", "f", "-ls"]);
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.contains("-rw"), "mode column: {line}");
    assert!(line.contains('5'), "size column: {line}");
    assert!(line.ends_with(&root.join("f").display().to_string()));
}

#[test]
fn xdev_stays_on_one_filesystem() {
    // /proc is a different filesystem from /; with -xdev the walk must not
    // descend into it. Only meaningful when /proc is mounted.
    if !Path::new("/proc/self").exists() {
        return;
    }

    let mut visited_proc_children = false;
    let opts = WalkOptions {
        same_filesystem: true,
        ..WalkOptions::default()
    };

    // Walk only two levels of / to keep this quick
    let mut count = 0usize;
    let _ = walk(Path::new("/"), &opts, &mut |visit: &mut Visit| {
        count += 1;
        if visit.depth() >= 2 {
            if visit.path().starts_with("/proc/") {
                visited_proc_children = true;
            }
            return Ok(Flow::SkipSubtree);
        }
        if count > 50_000 {
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    });

    assert!(!visited_proc_children);
}
